//! Synchronization primitives for the frame scheduler.
//!
//! Everything here is built on atomics. Threads coordinate through
//! single-word state cells and a spin barrier; the only multi-word shared
//! data is double-buffered and swapped between frames.

mod barrier;
mod double_buffer;
mod state_cell;

pub use barrier::FrameBarrier;
pub use double_buffer::{DoubleBuffered, ReadGuard, SwapBuffered, WriteGuard};
pub use state_cell::{StateCell, UnitState};
