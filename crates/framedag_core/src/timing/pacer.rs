//! # Frame Pacer
//!
//! End-of-frame pacing against a target frame length. A frame that finishes
//! early sleeps out the remainder; a frame that overruns starts the next
//! frame immediately. No catch-up and no frame skipping.

use std::time::{Duration, Instant};

/// Outcome of pacing one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePace {
    /// Time the frame's work actually took, excluding the pacing sleep.
    pub elapsed: Duration,
    /// How long the pacer slept to reach the target. Zero on overrun.
    pub slept: Duration,
    /// Whether the frame exceeded its target length.
    pub over_budget: bool,
}

/// Paces frames to a configured target length.
#[derive(Clone, Copy, Debug)]
pub struct FramePacer {
    target: Duration,
}

impl FramePacer {
    /// Creates a pacer with the given target frame length.
    #[must_use]
    pub const fn new(target: Duration) -> Self {
        Self { target }
    }

    /// Returns the target frame length.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> Duration {
        self.target
    }

    /// Changes the target frame length. Frame-boundary only.
    pub fn set_target(&mut self, target: Duration) {
        self.target = target;
    }

    /// Sleeps out whatever remains of the frame budget.
    ///
    /// `frame_start` is the instant the frame began. Overrunning frames do
    /// not sleep; the overrun is reported, never repaid.
    pub fn pace(&self, frame_start: Instant) -> FramePace {
        let elapsed = frame_start.elapsed();
        if elapsed >= self.target {
            return FramePace {
                elapsed,
                slept: Duration::ZERO,
                over_budget: elapsed > self.target,
            };
        }

        let remainder = self.target - elapsed;
        std::thread::sleep(remainder);
        FramePace {
            elapsed,
            slept: remainder,
            over_budget: false,
        }
    }
}
