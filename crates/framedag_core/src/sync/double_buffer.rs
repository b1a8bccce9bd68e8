//! # Double-Buffered Resource
//!
//! Lock-free front/back data exchange between work units.
//!
//! ## Safety Note
//!
//! This module requires unsafe code for lock-free double buffering.
//! All unsafe blocks are carefully reviewed and documented.

#![allow(unsafe_code)]
//!
//! ## Architecture
//!
//! ```text
//!              ┌───────────────────────────────┐
//!              │       DoubleBuffered<T>       │
//!              │                               │
//!              │   ┌────────┐    ┌────────┐    │
//!              │   │ Gen A  │    │ Gen B  │    │
//!              │   └───┬────┘    └───┬────┘    │
//!              │       │             │         │
//!              │   ┌───┴─────────────┴───┐     │
//!              │   │  Atomic Front (0/1) │     │
//!              │   └─────────────────────┘     │
//!              └───────────────────────────────┘
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ ReadGuard  │ │ WriteGuard │ │   swap()   │
//!   │ (any unit) │ │ (one/frame)│ │ (boundary) │
//!   └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - `ReadGuard`: shared access to the front generation (many allowed)
//! - `WriteGuard`: exclusive access to the back generation (one per frame)
//! - `swap()`: frame-boundary only, after the barrier confirms completion
//!
//! Single-writer-per-frame is the application's contract, expressed through
//! work unit dependencies. The writer-guard assert here is a defect trap,
//! not a synchronization mechanism.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Frame-boundary swap interface, object-safe so a scheduler can hold a
/// heterogeneous set of buffered resources.
pub trait SwapBuffered: Send + Sync {
    /// Swaps front and back if the back generation was written this frame,
    /// then clears the written mark. No-op otherwise.
    fn swap_if_written(&self);
}

/// Two generations of a value: a stable readable front and a writable back,
/// swapped only between frames.
///
/// Readers during a frame always see the generation produced by the
/// previous frame's swap, never a partially written one: the writer only
/// ever touches the back generation, and the swap happens while no unit is
/// executing.
pub struct DoubleBuffered<T> {
    /// The two generations. `UnsafeCell` because access is mediated by
    /// guards and the frame protocol, not by locks.
    generations: [UnsafeCell<T>; 2],
    /// Index of the current front (readable) generation.
    front: AtomicUsize,
    /// Whether a write guard is currently held.
    write_locked: AtomicBool,
    /// Number of active read guards.
    read_count: AtomicUsize,
    /// Whether the back generation was written since the last swap.
    written: AtomicBool,
}

impl<T> DoubleBuffered<T> {
    /// Creates a buffer with identical-by-construction generations.
    ///
    /// `front` is what readers see during the first frame; `back` is the
    /// first frame's write target.
    #[must_use]
    pub fn new(front: T, back: T) -> Self {
        Self {
            generations: [UnsafeCell::new(front), UnsafeCell::new(back)],
            front: AtomicUsize::new(0),
            write_locked: AtomicBool::new(false),
            read_count: AtomicUsize::new(0),
            written: AtomicBool::new(false),
        }
    }

    /// Returns whether a write guard is currently active.
    #[inline]
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.write_locked.load(Ordering::Acquire)
    }

    /// Returns the number of active read guards.
    #[inline]
    #[must_use]
    pub fn read_guard_count(&self) -> usize {
        self.read_count.load(Ordering::Acquire)
    }

    /// Returns whether the back generation has been written this frame.
    #[inline]
    #[must_use]
    pub fn written_this_frame(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    /// Gets a read guard for the front generation.
    ///
    /// Valid for the whole frame; multiple read guards can coexist.
    #[must_use]
    pub fn read(&self) -> ReadGuard<'_, T> {
        self.read_count.fetch_add(1, Ordering::AcqRel);
        ReadGuard {
            buffer: self,
            index: self.front.load(Ordering::Acquire),
        }
    }

    /// Gets a write guard for the back generation and marks the resource
    /// written for this frame.
    ///
    /// # Panics
    ///
    /// Panics if a write guard is already held. Two writers in one frame
    /// means the application's dependency declarations are wrong.
    #[must_use]
    pub fn write(&self) -> WriteGuard<'_, T> {
        let was_locked = self.write_locked.swap(true, Ordering::AcqRel);
        assert!(!was_locked, "double write guard on a buffered resource");

        self.written.store(true, Ordering::Release);
        WriteGuard {
            buffer: self,
            index: self.front.load(Ordering::Acquire) ^ 1,
        }
    }

    /// Swaps the front and back generations.
    ///
    /// Frame-boundary only: the scheduler calls this after the barrier
    /// confirms every unit is complete, so no guard can be taken
    /// concurrently.
    ///
    /// # Panics
    ///
    /// Panics if a write guard is still active.
    pub fn swap(&self) {
        assert!(
            !self.write_locked.load(Ordering::Acquire),
            "cannot swap a buffered resource while a write guard is active"
        );
        self.front.fetch_xor(1, Ordering::AcqRel);
    }
}

impl<T: Default> Default for DoubleBuffered<T> {
    fn default() -> Self {
        Self::new(T::default(), T::default())
    }
}

impl<T: Send + Sync> SwapBuffered for DoubleBuffered<T> {
    fn swap_if_written(&self) {
        if self.written.swap(false, Ordering::AcqRel) {
            self.swap();
        }
    }
}

// SAFETY: access to the UnsafeCells is mediated by the guards and the frame
// protocol: readers only touch the front generation, the single writer only
// touches the back, and swap happens while no guard is live.
unsafe impl<T: Send> Send for DoubleBuffered<T> {}
// SAFETY: as above; concurrent shared access never aliases a mutable borrow.
unsafe impl<T: Send + Sync> Sync for DoubleBuffered<T> {}

/// Shared access to the front generation for the duration of a frame.
pub struct ReadGuard<'a, T> {
    buffer: &'a DoubleBuffered<T>,
    index: usize,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // SAFETY: writers target the opposite generation and swap is
        // excluded while any unit (and therefore any guard) is live.
        unsafe { &*self.buffer.generations[self.index].get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.buffer.read_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive access to the back generation for the duration of a frame.
pub struct WriteGuard<'a, T> {
    buffer: &'a DoubleBuffered<T>,
    index: usize,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // SAFETY: the write_locked flag guarantees this guard is the only
        // access path to the back generation.
        unsafe { &*self.buffer.generations[self.index].get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: as in deref; exclusive by write_locked.
        unsafe { &mut *self.buffer.generations[self.index].get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.buffer.write_locked.store(false, Ordering::Release);
    }
}
