//! # Worker Pool & Claim Scan
//!
//! Persistent pool threads, spawned once and reused every frame. A frame
//! activates them over a channel; they race each other through the sorted
//! execution list claiming units, then meet the control thread at the
//! frame barrier.
//!
//! The scan is the hot path and holds no locks: state cells are read with
//! plain atomic loads and claimed with one compare-and-swap. A lost claim
//! is not contention to wait out, it is information - some other thread is
//! already on it - so the loser just keeps scanning.

#![allow(unsafe_code)]

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use framedag_core::{FrameBarrier, UnitState};
use tracing::{info, warn};

use crate::scheduler::{Shared, UnitFault, UnitSlot};

/// Control-to-pool message. One `Frame` per worker per frame.
enum Signal {
    Frame,
    Shutdown,
}

/// The persistent worker threads plus their activation channel.
pub(crate) struct WorkerPool {
    signal_tx: Sender<Signal>,
    /// Shared with every worker; participants = workers + control thread,
    /// which is also where the pool's size lives.
    barrier: Arc<FrameBarrier>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` pool threads parked on the activation channel.
    ///
    /// Zero workers is valid: the barrier degenerates to the control
    /// thread alone, which then drains the execution list itself.
    pub(crate) fn spawn(shared: Arc<Shared>, workers: usize) -> Self {
        let barrier = Arc::new(FrameBarrier::new(workers + 1));
        let (signal_tx, signal_rx) = unbounded();

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let shared = Arc::clone(&shared);
            let barrier = Arc::clone(&barrier);
            let signal_rx = signal_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("framedag-worker-{index}"))
                .spawn(move || worker_loop(&shared, &barrier, &signal_rx))
                .expect("failed to spawn pool worker thread");
            handles.push(handle);
        }

        info!(workers, "worker pool online");
        Self {
            signal_tx,
            barrier,
            handles,
        }
    }

    /// Number of pool threads, excluding the control thread.
    fn worker_count(&self) -> usize {
        self.barrier.participants() - 1
    }

    /// Releases every worker into the current frame's claim scan.
    ///
    /// Exactly one signal per worker: a worker consumes one, scans, and
    /// parks at the barrier, so no worker can run twice in one frame.
    pub(crate) fn activate(&self) {
        for _ in 0..self.worker_count() {
            // Workers only disconnect on shutdown, never mid-activation.
            let _ = self.signal_tx.send(Signal::Frame);
        }
    }

    /// The frame barrier the control thread must also arrive at.
    pub(crate) fn barrier(&self) -> Arc<FrameBarrier> {
        Arc::clone(&self.barrier)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in 0..self.worker_count() {
            let _ = self.signal_tx.send(Signal::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("pool worker exited by panic");
            }
        }
        info!(workers = self.worker_count(), "worker pool shut down");
    }
}

/// Park on the channel, scan when activated, meet at the barrier, repeat.
fn worker_loop(shared: &Shared, barrier: &FrameBarrier, signal_rx: &Receiver<Signal>) {
    loop {
        match signal_rx.recv() {
            Ok(Signal::Frame) => {
                claim_scan(shared);
                barrier.wait();
            }
            Ok(Signal::Shutdown) | Err(_) => return,
        }
    }
}

/// Walks the sorted execution list claiming and running ready units until
/// none are left unclaimed.
///
/// After every completed unit the scan restarts from the top, so the
/// priority order is re-applied as units become ready. When units remain
/// unclaimed but none are ready, the thread spins in place rather than
/// parking; frame-scale waits are far shorter than a kernel wake.
pub(crate) fn claim_scan(shared: &Shared) {
    // SAFETY: this is only reached inside a frame's activation/barrier
    // window; the topology is read-only for its whole duration.
    let topology = unsafe { shared.topology() };
    let slots = &topology.slots;

    'scan: loop {
        let mut unclaimed = false;
        for &index in &topology.plan.worker_order {
            let slot = &slots[index as usize];
            match slot.state.load() {
                UnitState::Unclaimed => {
                    unclaimed = true;
                    if deps_complete(slots, slot) && slot.state.try_claim() {
                        execute_claimed(shared, slot);
                        continue 'scan;
                    }
                }
                // Claimed or Running belongs to another thread; Complete
                // needs nothing from us. Scan onward either way.
                _ => {}
            }
        }
        if !unclaimed {
            return;
        }
        std::hint::spin_loop();
        std::thread::yield_now();
    }
}

/// Returns whether every dependency of `slot` is complete this frame.
pub(crate) fn deps_complete(slots: &[UnitSlot], slot: &UnitSlot) -> bool {
    slot.deps
        .iter()
        .all(|&dep| slots[dep as usize].state.load() == UnitState::Complete)
}

/// Runs a unit this thread just won the claim on, timing it and recording
/// any fault. The unit always reaches `Complete`.
pub(crate) fn execute_claimed(shared: &Shared, slot: &UnitSlot) {
    slot.state.begin_run();
    let started = Instant::now();

    // SAFETY: winning the compare-and-swap on the state cell grants this
    // thread exclusive access to the unit body until `complete()`.
    let work = unsafe { &mut *slot.work.get() };
    let outcome = work.run();

    let elapsed = started.elapsed();
    slot.last_duration_ns.store(
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
        Ordering::Release,
    );
    if let Err(fault) = outcome {
        warn!(unit = %slot.name, %fault, "work unit faulted");
        shared.faults.lock().push(UnitFault {
            unit: slot.name.clone(),
            message: fault.to_string(),
        });
    }
    slot.state.complete();
}
