//! # Rolling Average
//!
//! Bounded-window moving average of recent execution times. One of these
//! rides along with every work unit: the mean feeds the scheduler's sort
//! tie-break (longer units earlier) and, summed across units, the
//! frame-budget estimate.

use std::time::Duration;

/// A fixed-capacity window of duration samples.
///
/// Inserting into a full window evicts the oldest sample. The mean of an
/// empty window is defined as [`Duration::ZERO`]; callers that care about
/// "no data yet" should check [`RollingAverage::is_empty`] first.
#[derive(Clone, Debug)]
pub struct RollingAverage {
    /// Sample ring. Grows to `capacity` then stays there.
    samples: Vec<Duration>,
    /// Next write position once the ring is full.
    cursor: usize,
    /// Maximum number of retained samples.
    capacity: usize,
}

impl RollingAverage {
    /// Creates an empty window retaining at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "rolling average window cannot be empty");
        Self {
            samples: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
        }
    }

    /// Inserts a sample, evicting the oldest if the window is full.
    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.cursor] = sample;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }

    /// Returns the arithmetic mean of the current window.
    #[must_use]
    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / u32::try_from(self.samples.len()).unwrap_or(u32::MAX)
    }

    /// Returns the number of retained samples.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns whether no samples have been recorded yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the window capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
