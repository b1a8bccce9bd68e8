//! # Frame Barrier
//!
//! A reusable rendezvous point for frame boundaries. All participating
//! threads arrive once all work units are complete; the last arrival
//! releases everyone and re-arms the barrier for the next frame.
//!
//! Waiting spins (with yields) instead of blocking on a kernel primitive.
//! The wait is short by construction: a thread only arrives here after the
//! frame's remaining work is already done.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A reusable sense-reversing barrier.
///
/// `participants` threads call [`FrameBarrier::wait`]; every call blocks
/// until all have arrived, then all return and the barrier is immediately
/// reusable for the next frame.
#[derive(Debug)]
pub struct FrameBarrier {
    /// Threads that have arrived in the current generation.
    arrived: AtomicUsize,
    /// Generation counter. Incremented by the last arrival to release
    /// the waiters of the current generation.
    generation: AtomicUsize,
    /// Number of threads that must arrive to release the barrier.
    participants: usize,
}

impl FrameBarrier {
    /// Creates a barrier for `participants` threads.
    ///
    /// # Panics
    ///
    /// Panics if `participants` is zero.
    #[must_use]
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "barrier needs at least one participant");
        Self {
            arrived: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            participants,
        }
    }

    /// Returns the number of participating threads.
    #[inline]
    #[must_use]
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Arrives at the barrier and waits for all other participants.
    ///
    /// Returns `true` on exactly one of the participating threads per
    /// generation (the last arrival), mirroring `std::sync::Barrier`'s
    /// leader result.
    pub fn wait(&self) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        let arrived = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;

        if arrived == self.participants {
            // Last arrival: re-arm, then release this generation's waiters.
            self.arrived.store(0, Ordering::Release);
            self.generation.fetch_add(1, Ordering::Release);
            return true;
        }

        while self.generation.load(Ordering::Acquire) == generation {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
        false
    }
}
