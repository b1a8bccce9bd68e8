//! # Frame Scheduler
//!
//! THE ARCHITECT'S ORCHESTRATION:
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 0. REFUSE OR COMMIT                                                 │
//! │    └─ Cached cycle verdict bad? Refuse the whole frame.             │
//! │                                                                     │
//! │ 1. MONOPOLY UNITS (control thread, strictly sequential)             │
//! │                                                                     │
//! │ 2. MAIN-THREAD UNITS (control thread, dependency-ordered)           │
//! │                                                                     │
//! │ 3. ACTIVATE POOL against the sorted execution list                  │
//! │    └─ Control thread joins the claim scan                           │
//! │                                                                     │
//! │ 4. FRAME BARRIER                                                    │
//! │    └─ Releases only once every unit is Complete                     │
//! │                                                                     │
//! │ 5. SWAP every double-buffered resource written this frame           │
//! │                                                                     │
//! │ 6. FEED rolling averages with measured durations                    │
//! │                                                                     │
//! │ 7. PACE to the target frame length (overrun = start next at once)   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler owns every registered unit (arena storage addressed by
//! stable [`UnitId`]s); dependencies are index edges, never ownership
//! edges, so the graph cannot create ownership cycles.
//!
//! ## Safety Note
//!
//! This module requires unsafe code: the unit arena is read by every pool
//! thread during a frame and mutated only between frames. All unsafe
//! blocks are reviewed and documented against that protocol.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use framedag_core::{FramePacer, RollingAverage, StateCell, SwapBuffered};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::graph::{self, ExecutionPlan, GraphNode};
use crate::pool::{execute_claimed, WorkerPool};
use crate::unit::{MonopolyId, UnitId, WorkUnit};

/// Configuration for the frame scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of pool threads, in addition to the control thread.
    pub worker_threads: usize,
    /// Target frame length; early frames sleep out the remainder.
    pub target_frame_time: Duration,
    /// Rolling-average window per unit, in samples.
    pub sample_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        // Hardware concurrency minus the reserved control thread.
        let workers = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1);
        Self {
            worker_threads: workers,
            target_frame_time: Duration::from_micros(16_666),
            sample_window: 30,
        }
    }
}

/// A recorded work-unit fault.
///
/// The unit was marked complete so the frame could finish; the error it
/// returned is preserved here for the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitFault {
    /// Name of the faulting unit.
    pub unit: String,
    /// Display form of the error the unit returned.
    pub message: String,
}

/// Summary of one executed frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    /// Zero-based frame number.
    pub frame: u64,
    /// Time the frame's work took, excluding the pacing sleep.
    pub elapsed: Duration,
    /// Pacing sleep applied after the work finished.
    pub slept: Duration,
    /// Whether the frame exceeded the target frame length.
    pub over_budget: bool,
    /// Faults recorded by units this frame, in completion order.
    pub faults: Vec<UnitFault>,
}

/// Accumulated frame statistics.
#[derive(Clone, Debug)]
pub struct SchedulerStats {
    /// Total frames recorded.
    pub frames_recorded: u64,
    /// Sum of frame work times.
    pub total_elapsed: Duration,
    /// Shortest frame seen.
    pub min_frame: Duration,
    /// Longest frame seen.
    pub max_frame: Duration,
    /// Frames that exceeded the target length.
    pub frames_over_budget: u64,
}

impl SchedulerStats {
    fn new() -> Self {
        Self {
            frames_recorded: 0,
            total_elapsed: Duration::ZERO,
            min_frame: Duration::MAX,
            max_frame: Duration::ZERO,
            frames_over_budget: 0,
        }
    }

    fn record(&mut self, elapsed: Duration, over_budget: bool) {
        self.frames_recorded += 1;
        self.total_elapsed += elapsed;
        self.min_frame = self.min_frame.min(elapsed);
        self.max_frame = self.max_frame.max(elapsed);
        if over_budget {
            self.frames_over_budget += 1;
        }
    }

    /// Returns the average frame work time.
    #[must_use]
    pub fn avg_frame(&self) -> Duration {
        if self.frames_recorded == 0 {
            return Duration::ZERO;
        }
        self.total_elapsed / u32::try_from(self.frames_recorded).unwrap_or(u32::MAX)
    }

    /// Returns the fraction of frames that overran the target.
    #[must_use]
    pub fn over_budget_ratio(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.frames_over_budget as f64 / self.frames_recorded as f64
    }
}

/// One registered unit in the arena.
pub(crate) struct UnitSlot {
    /// Display name, cached from the unit.
    pub(crate) name: String,
    /// The unit body. Exclusive access is granted by winning the claim.
    pub(crate) work: UnsafeCell<Box<dyn WorkUnit>>,
    /// The claim state machine.
    pub(crate) state: StateCell,
    /// Arena indices this unit depends on.
    pub(crate) deps: Vec<u32>,
    /// Whether only the control thread may execute this unit.
    pub(crate) main_thread: bool,
    /// Tombstone flag; dead slots keep their index but leave the graph.
    pub(crate) alive: bool,
    /// Execution-time window, fed between frames.
    pub(crate) average: RollingAverage,
    /// This frame's measured duration in nanoseconds, written by the
    /// executing thread, read at the frame boundary.
    pub(crate) last_duration_ns: AtomicU64,
}

/// A registered monopoly unit. Control-thread exclusive, so no claim cell.
struct MonopolySlot {
    name: String,
    work: Box<dyn WorkUnit>,
    average: RollingAverage,
    last_duration: Duration,
    /// Tombstone flag; dead slots keep their index but never run again.
    alive: bool,
}

/// Unit arena plus the derived execution plan.
///
/// Mutated only between frames by whichever thread holds the busy flag;
/// read without synchronization by every thread during a frame.
pub(crate) struct Topology {
    pub(crate) slots: Vec<UnitSlot>,
    monopolies: Vec<MonopolySlot>,
    pub(crate) plan: ExecutionPlan,
}

/// State shared between the control thread and the worker pool.
pub(crate) struct Shared {
    /// The arena. See [`Topology`] for the access protocol.
    topology: UnsafeCell<Topology>,
    /// Held while a frame executes or a mutation is applied. This is the
    /// gate that turns mid-frame mutation attempts into errors instead of
    /// data races.
    busy: AtomicBool,
    /// Cached verdict of the last sort, readable without the busy flag.
    plan_ok: AtomicBool,
    /// The cycle error behind a false `plan_ok`. Cold path.
    plan_fault: Mutex<Option<SchedulerError>>,
    /// Double-buffered resources to swap at frame boundaries. Cold path.
    resources: Mutex<Vec<Arc<dyn SwapBuffered>>>,
    /// Faults recorded by executing units. Cold path.
    pub(crate) faults: Mutex<Vec<UnitFault>>,
    /// Target frame length in nanoseconds.
    target_frame_ns: AtomicU64,
    /// Frames started so far.
    frame: AtomicU64,
}

// SAFETY: the UnsafeCell topology is only mutated while `busy` is held and
// no frame is active, and only read by pool threads inside the activation /
// barrier window of a frame. Channel activation and the frame barrier
// provide the happens-before edges between those phases.
unsafe impl Send for Shared {}
// SAFETY: as above.
unsafe impl Sync for Shared {}

/// Clears the busy flag when a frame or mutation finishes.
struct BusyGuard<'a>(&'a Shared);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

impl Shared {
    /// Acquires the busy flag, failing with `err` if it is already held.
    fn acquire_busy(&self, err: SchedulerError) -> SchedulerResult<BusyGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(err);
        }
        Ok(BusyGuard(self))
    }

    /// Shared view of the topology.
    ///
    /// # Safety
    ///
    /// Caller must be inside an active frame's activation/barrier window,
    /// or hold the busy flag.
    pub(crate) unsafe fn topology(&self) -> &Topology {
        &*self.topology.get()
    }

    /// Exclusive view of the topology.
    ///
    /// # Safety
    ///
    /// Caller must hold the busy flag and no pool thread may be inside an
    /// activation window.
    #[allow(clippy::mut_from_ref)]
    unsafe fn topology_mut(&self) -> &mut Topology {
        &mut *self.topology.get()
    }
}

/// The dependency-graph frame scheduler.
///
/// One explicit context object: the application constructs it, registers
/// units and resources, then drives it with [`FrameScheduler::run_one_frame`]
/// from its control thread. Dropping the scheduler shuts the pool down and
/// releases every registered unit.
pub struct FrameScheduler {
    shared: Arc<Shared>,
    /// The pool is touched once per frame (activation) and on reconfigure.
    pool: Mutex<WorkerPool>,
    stats: Mutex<SchedulerStats>,
    sample_window: usize,
}

impl FrameScheduler {
    /// Creates a scheduler and spawns its worker pool.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared {
            topology: UnsafeCell::new(Topology {
                slots: Vec::new(),
                monopolies: Vec::new(),
                plan: ExecutionPlan::default(),
            }),
            busy: AtomicBool::new(false),
            plan_ok: AtomicBool::new(true),
            plan_fault: Mutex::new(None),
            resources: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            target_frame_ns: AtomicU64::new(u64::try_from(
                config.target_frame_time.as_nanos(),
            )
            .unwrap_or(u64::MAX)),
            frame: AtomicU64::new(0),
        });
        let pool = WorkerPool::spawn(Arc::clone(&shared), config.worker_threads);
        Self {
            shared,
            pool: Mutex::new(pool),
            stats: Mutex::new(SchedulerStats::new()),
            sample_window: config.sample_window.max(1),
        }
    }

    // =========================================================================
    // Control surface - configuration, between frames only
    // =========================================================================

    /// Registers a pool-eligible work unit, transferring ownership to the
    /// scheduler.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call.
    pub fn register(&self, unit: impl WorkUnit + 'static) -> SchedulerResult<UnitId> {
        self.register_slot(Box::new(unit), false)
    }

    /// Registers a work unit that only the control thread may execute
    /// (device submission, windowing calls).
    ///
    /// Main-thread units run before the pool activates, so their
    /// dependencies must themselves be monopoly or main-thread units; a
    /// dependency on a pool unit can never become ready and stalls the
    /// frame.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call.
    pub fn register_main_thread(&self, unit: impl WorkUnit + 'static) -> SchedulerResult<UnitId> {
        self.register_slot(Box::new(unit), true)
    }

    fn register_slot(&self, work: Box<dyn WorkUnit>, main_thread: bool) -> SchedulerResult<UnitId> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology_mut() };

        let id = UnitId(u32::try_from(topology.slots.len()).unwrap_or(u32::MAX));
        topology.slots.push(UnitSlot {
            name: work.name().to_owned(),
            work: UnsafeCell::new(work),
            state: StateCell::new(),
            deps: Vec::new(),
            main_thread,
            alive: true,
            average: RollingAverage::new(self.sample_window),
            last_duration_ns: AtomicU64::new(0),
        });
        self.rebuild_plan(topology);
        Ok(id)
    }

    /// Registers a monopoly unit: it runs to completion, alone, on the
    /// control thread before any parallel work, in registration order.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call.
    pub fn register_monopoly(
        &self,
        unit: impl WorkUnit + 'static,
    ) -> SchedulerResult<MonopolyId> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology_mut() };

        let id = MonopolyId(u32::try_from(topology.monopolies.len()).unwrap_or(u32::MAX));
        topology.monopolies.push(MonopolySlot {
            name: unit.name().to_owned(),
            work: Box::new(unit),
            average: RollingAverage::new(self.sample_window),
            last_duration: Duration::ZERO,
            alive: true,
        });
        Ok(id)
    }

    /// Removes a monopoly unit. Its id is never reused.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call,
    /// [`SchedulerError::UnknownMonopoly`] if the id was never live.
    pub fn remove_monopoly(&self, id: MonopolyId) -> SchedulerResult<()> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology_mut() };

        let slot = topology
            .monopolies
            .get_mut(id.0 as usize)
            .filter(|m| m.alive)
            .ok_or(SchedulerError::UnknownMonopoly(id))?;
        slot.alive = false;
        Ok(())
    }

    /// Removes a unit. Its id is never reused, and the removed unit is
    /// stripped from every other unit's dependency list.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call,
    /// [`SchedulerError::UnknownUnit`] if the id was never live.
    pub fn remove(&self, id: UnitId) -> SchedulerResult<()> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology_mut() };

        let index = id.0 as usize;
        if topology.slots.get(index).map_or(true, |s| !s.alive) {
            return Err(SchedulerError::UnknownUnit(id));
        }
        topology.slots[index].alive = false;
        topology.slots[index].deps.clear();
        for slot in &mut topology.slots {
            slot.deps.retain(|&dep| dep != id.0);
        }
        self.rebuild_plan(topology);
        Ok(())
    }

    /// Declares that `unit` must not start until `depends_on` is complete
    /// this frame. Idempotent for an existing edge.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call,
    /// [`SchedulerError::UnknownUnit`] / [`SchedulerError::SelfDependency`]
    /// for bad edges. A cycle introduced here is reported by the next
    /// [`FrameScheduler::run_one_frame`] and by [`FrameScheduler::plan_error`].
    pub fn add_dependency(&self, unit: UnitId, depends_on: UnitId) -> SchedulerResult<()> {
        if unit == depends_on {
            return Err(SchedulerError::SelfDependency(unit));
        }
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology_mut() };

        for id in [unit, depends_on] {
            if topology.slots.get(id.0 as usize).map_or(true, |s| !s.alive) {
                return Err(SchedulerError::UnknownUnit(id));
            }
        }
        let deps = &mut topology.slots[unit.0 as usize].deps;
        if !deps.contains(&depends_on.0) {
            deps.push(depends_on.0);
        }
        self.rebuild_plan(topology);
        Ok(())
    }

    /// Removes a previously declared dependency edge.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call,
    /// [`SchedulerError::UnknownUnit`] if `unit` is not live.
    pub fn remove_dependency(&self, unit: UnitId, depends_on: UnitId) -> SchedulerResult<()> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology_mut() };

        if topology.slots.get(unit.0 as usize).map_or(true, |s| !s.alive) {
            return Err(SchedulerError::UnknownUnit(unit));
        }
        topology.slots[unit.0 as usize]
            .deps
            .retain(|&dep| dep != depends_on.0);
        self.rebuild_plan(topology);
        Ok(())
    }

    /// Seeds a unit's rolling average with an estimated cost so the very
    /// first sort already has a duration key.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call,
    /// [`SchedulerError::UnknownUnit`] if the id is not live.
    pub fn set_cost_hint(&self, id: UnitId, cost: Duration) -> SchedulerResult<()> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology_mut() };

        let slot = topology
            .slots
            .get_mut(id.0 as usize)
            .filter(|s| s.alive)
            .ok_or(SchedulerError::UnknownUnit(id))?;
        slot.average.record(cost);
        self.rebuild_plan(topology);
        Ok(())
    }

    /// Changes the target frame length.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call.
    pub fn set_target_frame_time(&self, target: Duration) -> SchedulerResult<()> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        self.shared.target_frame_ns.store(
            u64::try_from(target.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Release,
        );
        Ok(())
    }

    /// Replaces the worker pool with one of `workers` threads.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call.
    pub fn set_worker_threads(&self, workers: usize) -> SchedulerResult<()> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        let mut pool = self.pool.lock();
        *pool = WorkerPool::spawn(Arc::clone(&self.shared), workers);
        Ok(())
    }

    /// Registers a double-buffered resource to be swapped at the end of
    /// every frame in which it was written.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call.
    pub fn register_resource(&self, resource: Arc<dyn SwapBuffered>) -> SchedulerResult<()> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        self.shared.resources.lock().push(resource);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns whether the last sort succeeded, i.e. a frame may run.
    #[must_use]
    pub fn plan_is_valid(&self) -> bool {
        self.shared.plan_ok.load(Ordering::Acquire)
    }

    /// Returns the configuration error that invalidated the plan, if any.
    #[must_use]
    pub fn plan_error(&self) -> Option<SchedulerError> {
        self.shared.plan_fault.lock().clone()
    }

    /// Returns the number of frames started so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.shared.frame.load(Ordering::Acquire)
    }

    /// Returns accumulated frame statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    /// Sums every unit's rolling average: the expected serial cost of a
    /// frame, for comparing against the target budget.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::MutationMidFrame`] if the scheduler is busy with a
    /// frame or another configuration call.
    pub fn estimated_frame_cost(&self) -> SchedulerResult<Duration> {
        let _busy = self
            .shared
            .acquire_busy(SchedulerError::MutationMidFrame)?;
        // SAFETY: busy flag held, no frame active.
        let topology = unsafe { self.shared.topology() };
        let units: Duration = topology
            .slots
            .iter()
            .filter(|s| s.alive)
            .map(|s| s.average.mean())
            .sum();
        let monopolies: Duration = topology
            .monopolies
            .iter()
            .filter(|m| m.alive)
            .map(|m| m.average.mean())
            .sum();
        Ok(units + monopolies)
    }

    // =========================================================================
    // Frame execution
    // =========================================================================

    /// Executes exactly one frame.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::DependencyCycle`] if the last sort failed (the
    /// frame is refused outright, nothing partial runs) and
    /// [`SchedulerError::FrameInProgress`] if another frame is executing.
    pub fn run_one_frame(&self) -> SchedulerResult<FrameReport> {
        let _busy = self.shared.acquire_busy(SchedulerError::FrameInProgress)?;
        if !self.shared.plan_ok.load(Ordering::Acquire) {
            let fault = self.shared.plan_fault.lock().clone();
            return Err(fault.unwrap_or(SchedulerError::MutationMidFrame));
        }

        let frame = self.shared.frame.fetch_add(1, Ordering::AcqRel);
        let frame_start = Instant::now();

        // (1) Monopoly units, strictly sequential on this thread.
        // SAFETY: busy flag held; the pool is parked, nothing else reads.
        let topology = unsafe { self.shared.topology_mut() };
        for slot in &mut topology.slots {
            if slot.alive {
                slot.state.reset();
            }
        }
        for monopoly in topology.monopolies.iter_mut().filter(|m| m.alive) {
            let started = Instant::now();
            let outcome = monopoly.work.run();
            monopoly.last_duration = started.elapsed();
            if let Err(fault) = outcome {
                warn!(unit = %monopoly.name, %fault, "monopoly unit faulted");
                self.shared.faults.lock().push(UnitFault {
                    unit: monopoly.name.clone(),
                    message: fault.to_string(),
                });
            }
        }

        // (2) Main-thread-only units, dependency-ordered on this thread.
        // SAFETY: shared view for the rest of the parallel phase.
        let topology = unsafe { self.shared.topology() };
        Self::run_main_units(&self.shared, topology);

        // (3) Activate the pool and join the scan. (4) Barrier.
        let barrier = {
            let pool = self.pool.lock();
            pool.activate();
            pool.barrier()
        };
        crate::pool::claim_scan(&self.shared);
        barrier.wait();

        // (5) Swap what was written.
        for resource in self.shared.resources.lock().iter() {
            resource.swap_if_written();
        }

        // (6) Feed the averages.
        // SAFETY: the barrier released, so every pool thread is parked
        // again; this thread is the only one touching the topology.
        let topology = unsafe { self.shared.topology_mut() };
        for slot in &mut topology.slots {
            if slot.alive {
                let nanos = slot.last_duration_ns.load(Ordering::Acquire);
                slot.average.record(Duration::from_nanos(nanos));
            }
        }
        for monopoly in topology.monopolies.iter_mut().filter(|m| m.alive) {
            let last = monopoly.last_duration;
            monopoly.average.record(last);
        }

        // (7) Pace. Overruns start the next frame immediately.
        let target = Duration::from_nanos(self.shared.target_frame_ns.load(Ordering::Acquire));
        let pace = FramePacer::new(target).pace(frame_start);
        if pace.over_budget {
            warn!(frame, elapsed_us = pace.elapsed.as_micros() as u64, "frame over budget");
        }
        self.stats.lock().record(pace.elapsed, pace.over_budget);

        let faults = std::mem::take(&mut *self.shared.faults.lock());
        debug!(
            frame,
            elapsed_us = pace.elapsed.as_micros() as u64,
            faults = faults.len(),
            "frame complete"
        );
        Ok(FrameReport {
            frame,
            elapsed: pace.elapsed,
            slept: pace.slept,
            over_budget: pace.over_budget,
            faults,
        })
    }

    /// Runs every main-thread-only unit to completion, claiming ready ones
    /// and spinning past unready ones until none remain.
    fn run_main_units(shared: &Shared, topology: &Topology) {
        loop {
            let mut remaining = false;
            for &index in &topology.plan.main_order {
                let slot = &topology.slots[index as usize];
                match slot.state.load() {
                    framedag_core::UnitState::Complete => {}
                    framedag_core::UnitState::Unclaimed => {
                        remaining = true;
                        if crate::pool::deps_complete(&topology.slots, slot)
                            && slot.state.try_claim()
                        {
                            execute_claimed(shared, slot);
                        }
                    }
                    // Only this thread claims main units, so Claimed or
                    // Running here is unreachable; treat as pending.
                    _ => remaining = true,
                }
            }
            if !remaining {
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Rebuilds the execution plan and caches the cycle verdict.
    fn rebuild_plan(&self, topology: &mut Topology) {
        let nodes: Vec<GraphNode<'_>> = topology
            .slots
            .iter()
            .map(|slot| GraphNode {
                name: &slot.name,
                alive: slot.alive,
                main_thread: slot.main_thread,
                deps: &slot.deps,
                mean_cost: slot.average.mean(),
            })
            .collect();

        match graph::detect_cycle(&nodes) {
            Ok(()) => {
                let plan = graph::build_plan(&nodes);
                drop(nodes);
                topology.plan = plan;
                self.shared.plan_ok.store(true, Ordering::Release);
                *self.shared.plan_fault.lock() = None;
            }
            Err(units) => {
                warn!(?units, "dependency cycle detected; scheduler will refuse frames");
                self.shared.plan_ok.store(false, Ordering::Release);
                *self.shared.plan_fault.lock() =
                    Some(SchedulerError::DependencyCycle { units });
            }
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::FnWorkUnit;
    use framedag_core::DoubleBuffered;
    use std::sync::atomic::AtomicUsize;

    fn quiet_config(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            worker_threads: workers,
            // Zero target: tests never sleep in the pacer.
            target_frame_time: Duration::ZERO,
            sample_window: 8,
        }
    }

    fn counting_unit(name: &str, counter: &Arc<AtomicUsize>) -> impl WorkUnit + 'static {
        let counter = Arc::clone(counter);
        FnWorkUnit::new(name.to_owned(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_frame_runs_every_unit_once() {
        let scheduler = FrameScheduler::new(quiet_config(2));
        let counter = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c", "d"] {
            scheduler
                .register(counting_unit(name, &counter))
                .expect("registration between frames");
        }

        let report = scheduler.run_one_frame().expect("plan is acyclic");
        assert_eq!(report.frame, 0);
        assert!(report.faults.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        scheduler.run_one_frame().expect("second frame");
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(scheduler.frame_count(), 2);
    }

    #[test]
    fn test_monopoly_and_main_thread_units_run_on_control_thread() {
        let scheduler = FrameScheduler::new(quiet_config(2));
        let control = std::thread::current().id();

        let seen_monopoly = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen_monopoly);
            scheduler
                .register_monopoly(FnWorkUnit::new("physics_monopoly", move || {
                    assert_eq!(std::thread::current().id(), control);
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .expect("monopoly registration");
        }

        let seen_main = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen_main);
            scheduler
                .register_main_thread(FnWorkUnit::new("gpu_submit", move || {
                    assert_eq!(std::thread::current().id(), control);
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .expect("main-thread registration");
        }

        scheduler.run_one_frame().expect("frame runs");
        assert_eq!(seen_monopoly.load(Ordering::SeqCst), 1);
        assert_eq!(seen_main.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cyclic_plan_refuses_to_run() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let a = scheduler.register(counting_unit("a", &counter)).unwrap();
        let b = scheduler.register(counting_unit("b", &counter)).unwrap();
        scheduler.add_dependency(a, b).expect("first edge is fine");
        scheduler.add_dependency(b, a).expect("edge accepted, plan goes invalid");

        assert!(!scheduler.plan_is_valid());
        let refusal = scheduler.run_one_frame().expect_err("cyclic plan");
        assert!(matches!(refusal, SchedulerError::DependencyCycle { .. }));
        // Nothing partial ran.
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Breaking the cycle restores service.
        scheduler.remove_dependency(b, a).expect("between frames");
        assert!(scheduler.plan_is_valid());
        scheduler.run_one_frame().expect("acyclic again");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let a = scheduler.register(counting_unit("a", &counter)).unwrap();
        assert_eq!(
            scheduler.add_dependency(a, a),
            Err(SchedulerError::SelfDependency(a))
        );
    }

    #[test]
    fn test_removed_unit_is_unknown_and_edges_are_stripped() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let a = scheduler.register(counting_unit("a", &counter)).unwrap();
        let b = scheduler.register(counting_unit("b", &counter)).unwrap();
        scheduler.add_dependency(b, a).expect("edge accepted");

        scheduler.remove(a).expect("removal between frames");
        assert_eq!(scheduler.remove(a), Err(SchedulerError::UnknownUnit(a)));
        assert_eq!(
            scheduler.add_dependency(b, a),
            Err(SchedulerError::UnknownUnit(a))
        );

        // b no longer waits on the dead unit.
        scheduler.run_one_frame().expect("b still runs");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_monopoly_no_longer_runs() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let id = {
            let counter = Arc::clone(&counter);
            scheduler
                .register_monopoly(FnWorkUnit::new("world_step", move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .expect("monopoly registration")
        };

        scheduler.run_one_frame().expect("frame runs");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        scheduler.remove_monopoly(id).expect("removal between frames");
        assert_eq!(
            scheduler.remove_monopoly(id),
            Err(SchedulerError::UnknownMonopoly(id))
        );

        // The dead slot is skipped by later frames and by the estimate.
        scheduler.run_one_frame().expect("frame runs");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.estimated_frame_cost().expect("between frames"),
            Duration::ZERO
        );
    }

    #[test]
    fn test_second_frame_while_running_is_refused() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        scheduler
            .register(FnWorkUnit::new("slow", || {
                std::thread::sleep(Duration::from_millis(120));
                Ok(())
            }))
            .expect("registration");

        std::thread::scope(|scope| {
            let runner = scope.spawn(|| scheduler.run_one_frame().expect("frame runs"));

            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(
                scheduler.run_one_frame().expect_err("a frame is already executing"),
                SchedulerError::FrameInProgress
            );

            runner.join().expect("frame thread");
        });

        // The refusal left nothing behind; the next frame runs cleanly.
        scheduler.run_one_frame().expect("clean frame");
    }

    #[test]
    fn test_faulting_unit_completes_and_is_reported() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let counter = Arc::new(AtomicUsize::new(0));

        let faulty = scheduler
            .register(FnWorkUnit::new("faulty", || Err("texture missing".into())))
            .unwrap();
        let dependent = scheduler.register(counting_unit("dependent", &counter)).unwrap();
        scheduler.add_dependency(dependent, faulty).expect("edge accepted");

        let report = scheduler.run_one_frame().expect("frame still completes");
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].unit, "faulty");
        assert_eq!(report.faults[0].message, "texture missing");
        // The dependent of the faulted unit still ran.
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Faults do not leak into the next frame's report.
        let report = scheduler.run_one_frame().expect("second frame");
        assert_eq!(report.faults.len(), 1);
    }

    #[test]
    fn test_registered_resource_swaps_only_when_written() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let resource = Arc::new(DoubleBuffered::new(0_u64, 0_u64));
        scheduler
            .register_resource(Arc::clone(&resource) as Arc<dyn SwapBuffered>)
            .expect("resource registration");

        {
            let writer = Arc::clone(&resource);
            scheduler
                .register(FnWorkUnit::new("producer", move || {
                    *writer.write() = 41;
                    Ok(())
                }))
                .expect("registration");
        }

        scheduler.run_one_frame().expect("frame runs");
        // The generation written during the frame became the front.
        assert_eq!(*resource.read(), 41);
    }

    #[test]
    fn test_mutation_mid_frame_is_rejected_and_not_applied() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let a = scheduler.register(counting_unit("a", &counter)).unwrap();
        let b = scheduler
            .register(FnWorkUnit::new("slow", || {
                std::thread::sleep(Duration::from_millis(120));
                Ok(())
            }))
            .unwrap();

        std::thread::scope(|scope| {
            let runner = scope.spawn(|| scheduler.run_one_frame().expect("frame runs"));

            // Let the frame get going, then try to edit topology.
            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(
                scheduler.add_dependency(a, b),
                Err(SchedulerError::MutationMidFrame)
            );
            assert_eq!(
                scheduler.register(counting_unit("late", &counter)).err(),
                Some(SchedulerError::MutationMidFrame)
            );
            assert_eq!(
                scheduler.set_target_frame_time(Duration::from_millis(1)),
                Err(SchedulerError::MutationMidFrame)
            );

            runner.join().expect("frame thread");
        });

        // The rejected edge was not applied: a does not depend on b, and
        // another frame runs cleanly.
        scheduler.run_one_frame().expect("clean frame");
    }

    #[test]
    fn test_averages_recorded_and_cost_estimate_updates() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let id = scheduler
            .register(FnWorkUnit::new("busy", || {
                std::thread::sleep(Duration::from_millis(5));
                Ok(())
            }))
            .unwrap();
        assert_eq!(
            scheduler.estimated_frame_cost().expect("between frames"),
            Duration::ZERO
        );

        scheduler.set_cost_hint(id, Duration::from_millis(5)).expect("hint");
        scheduler.run_one_frame().expect("frame runs");

        let estimate = scheduler.estimated_frame_cost().expect("between frames");
        assert!(estimate >= Duration::from_millis(4), "estimate was {estimate:?}");

        let stats = scheduler.stats();
        assert_eq!(stats.frames_recorded, 1);
        assert!(stats.max_frame >= Duration::from_millis(4));
    }

    #[test]
    fn test_zero_workers_runs_on_control_thread_alone() {
        let scheduler = FrameScheduler::new(quiet_config(0));
        let counter = Arc::new(AtomicUsize::new(0));
        let a = scheduler.register(counting_unit("a", &counter)).unwrap();
        let b = scheduler.register(counting_unit("b", &counter)).unwrap();
        scheduler.add_dependency(b, a).expect("edge accepted");

        scheduler.run_one_frame().expect("control thread drains the list");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_pool_resize_between_frames() {
        let scheduler = FrameScheduler::new(quiet_config(1));
        let counter = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            scheduler.register(counting_unit(name, &counter)).unwrap();
        }
        scheduler.run_one_frame().expect("frame with 1 worker");
        scheduler.set_worker_threads(3).expect("resize between frames");
        scheduler.run_one_frame().expect("frame with 3 workers");
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }
}
