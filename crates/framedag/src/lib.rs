//! # FRAMEDAG Scheduler
//!
//! Lock-free dependency-graph frame scheduler designed for:
//! - One frame of work, every frame, on a fixed worker pool
//! - Claim races resolved by a single compare-and-swap, never a lock
//! - Deterministic priority: dependent count, then measured cost
//!
//! ## Architecture Rules
//!
//! 1. **The execution list is frozen mid-frame** - sorting and topology
//!    mutation happen only between frames
//! 2. **Threads synchronize on work units** - the scheduler itself holds no
//!    hot-path locks
//! 3. **A frame runs whole or not at all** - a cyclic graph refuses the
//!    frame before anything executes
//!
//! ## Example
//!
//! ```rust,ignore
//! use framedag::{FnWorkUnit, FrameScheduler, SchedulerConfig};
//!
//! let scheduler = FrameScheduler::new(SchedulerConfig::default());
//! let physics = scheduler.register(FnWorkUnit::new("physics", || Ok(())))?;
//! let render = scheduler.register(FnWorkUnit::new("render", || Ok(())))?;
//! scheduler.add_dependency(render, physics)?;
//! loop {
//!     let report = scheduler.run_one_frame()?;
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
mod graph;
mod pool;
pub mod scheduler;
pub mod unit;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{
    FrameReport, FrameScheduler, SchedulerConfig, SchedulerStats, UnitFault,
};
pub use unit::{AsyncWorkUnit, FnWorkUnit, MonopolyId, UnitError, UnitId, WorkUnit};

// Re-export the primitives applications touch directly.
pub use framedag_core::{
    DoubleBuffered, FramePace, FramePacer, ReadGuard, RollingAverage, SwapBuffered, WriteGuard,
};
