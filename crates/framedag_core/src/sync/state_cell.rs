//! # Atomic Claim Cell
//!
//! The single word of synchronization each work unit carries. Threads race
//! on this cell with a compare-and-swap; the winner owns the unit for the
//! rest of the frame and advances it without further contention.

use std::sync::atomic::{AtomicU8, Ordering};

/// Execution state of a work unit within one frame.
///
/// States only ever advance in this order within a frame:
///
/// ```text
/// Unclaimed ──CAS──> Claimed ──> Running ──> Complete
///     ^                                          │
///     └────────── reset (frame boundary) ────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitState {
    /// Available for any scanning thread to claim.
    Unclaimed = 0,
    /// Won by exactly one thread; not yet executing.
    Claimed = 1,
    /// The owning thread is executing the unit's work.
    Running = 2,
    /// Finished for this frame. Terminal until the next reset.
    Complete = 3,
}

impl UnitState {
    /// Decodes a raw cell value.
    #[inline]
    #[must_use]
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Unclaimed,
            1 => Self::Claimed,
            2 => Self::Running,
            _ => Self::Complete,
        }
    }
}

/// A compare-and-swap state cell for one work unit.
///
/// The claim transition (`Unclaimed -> Claimed`) is the only contended
/// operation and is a single CAS. The later transitions belong exclusively
/// to the claim winner, so they are plain release stores. A failed claim is
/// expected and silent: the scanning thread simply moves on.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Creates a cell in the `Unclaimed` state.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(UnitState::Unclaimed as u8))
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn load(&self) -> UnitState {
        UnitState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Attempts the `Unclaimed -> Claimed` transition.
    ///
    /// Returns `true` if this thread won the claim. Exactly one caller can
    /// ever win between two resets; losers must not retry this unit in the
    /// current pass.
    #[inline]
    #[must_use]
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(
                UnitState::Unclaimed as u8,
                UnitState::Claimed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Marks the unit `Running`.
    ///
    /// Must only be called by the thread that won [`StateCell::try_claim`].
    #[inline]
    pub fn begin_run(&self) {
        debug_assert_eq!(self.load(), UnitState::Claimed);
        self.0.store(UnitState::Running as u8, Ordering::Release);
    }

    /// Marks the unit `Complete` for this frame.
    ///
    /// Must only be called by the thread that won the claim. The release
    /// store is what publishes the unit's side effects to dependents: a
    /// dependent observes `Complete` with an acquire load before it can be
    /// claimed, so completion happens-before the dependent's execution.
    #[inline]
    pub fn complete(&self) {
        debug_assert_eq!(self.load(), UnitState::Running);
        self.0.store(UnitState::Complete as u8, Ordering::Release);
    }

    /// Resets to `Unclaimed` for the next frame.
    ///
    /// Frame-boundary only: no thread may be scanning while this runs.
    #[inline]
    pub fn reset(&self) {
        self.0.store(UnitState::Unclaimed as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
