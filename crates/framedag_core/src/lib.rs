//! # FRAMEDAG Core Primitives
//!
//! Lock-free building blocks for per-frame scheduling:
//! - Atomic claim cells so exactly one thread wins each work unit
//! - Double-buffered resources swapped only at frame boundaries
//! - A reusable spin barrier that serializes those boundaries
//! - Rolling duration averages and frame pacing
//!
//! ## Architecture Rules
//!
//! 1. **No blocking locks** - every primitive here is atomics + spinning
//! 2. **Frame-boundary mutation only** - anything non-atomic is touched
//!    exclusively between frames
//! 3. **Contention lives on the unit, not the queue** - threads race on
//!    single-word claim cells, never on a shared structure

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod sync;
pub mod timing;

pub use sync::{
    DoubleBuffered, FrameBarrier, ReadGuard, StateCell, SwapBuffered, UnitState, WriteGuard,
};
pub use timing::{FramePace, FramePacer, RollingAverage};
