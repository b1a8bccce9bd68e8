//! Timing support: rolling duration averages and end-of-frame pacing.

mod pacer;
mod rolling_average;

pub use pacer::{FramePace, FramePacer};
pub use rolling_average::RollingAverage;
