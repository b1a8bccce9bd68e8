//! # Work Units
//!
//! The schedulable entity. Application code implements [`WorkUnit`] and
//! hands ownership to the scheduler; the scheduler never inspects unit
//! bodies, it only claims, runs, and times them.
//!
//! Physics stepping, rendering calls, AI, and I/O polling all live behind
//! this trait. The [`AsyncWorkUnit`] adapter covers the background-load
//! case: spawn once, poll every frame, never block a claiming thread.

use crossbeam_channel::{bounded, Receiver, TryRecvError};

/// Stable handle to a registered work unit.
///
/// Handed out by registration and used to declare dependencies. Ids are
/// arena indices into the scheduler's unit storage and are never reused,
/// so a stale id after removal is detected, not misdirected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitId(pub(crate) u32);

/// Stable handle to a registered monopoly unit.
///
/// Monopoly units run alone, in registration order, before any parallel
/// work each frame. They take part in no dependency edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MonopolyId(pub(crate) u32);

/// Error produced by a work unit's own execution.
///
/// The scheduler records it, marks the unit complete so the frame and the
/// unit's dependents still finish, and reports it in the frame report.
pub type UnitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A unit of work executed once per frame.
///
/// Implementations must be `Send`: any pool thread may end up running a
/// given unit. Data shared between units goes through dependency ordering
/// and double-buffered resources, never through locks inside `run`.
pub trait WorkUnit: Send {
    /// Stable display name, used in logs and cycle reports.
    fn name(&self) -> &str;

    /// Executes one frame's worth of work.
    ///
    /// An `Err` is a fault: it is recorded for the caller and the unit is
    /// still marked complete for the frame. A `run` that never returns
    /// stalls the frame barrier indefinitely; that contract belongs to the
    /// caller, not the scheduler.
    fn run(&mut self) -> Result<(), UnitError>;
}

/// Closure adapter, the simplest [`WorkUnit`] implementation.
///
/// Suitable for most units: one function that does the actual work.
pub struct FnWorkUnit<F> {
    name: String,
    body: F,
}

impl<F> FnWorkUnit<F>
where
    F: FnMut() -> Result<(), UnitError> + Send,
{
    /// Wraps a closure as a named work unit.
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

impl<F> WorkUnit for FnWorkUnit<F>
where
    F: FnMut() -> Result<(), UnitError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<(), UnitError> {
        (self.body)()
    }
}

/// A work unit that manages an externally spawned background task.
///
/// On its first execution it spawns one thread running the supplied
/// producer (a file load, a network fetch). On every later execution it
/// only polls the completion channel and returns immediately, so the
/// claiming thread is never blocked. Once the producer finishes, the
/// result is held here until the owner takes it.
pub struct AsyncWorkUnit<T: Send + 'static> {
    name: String,
    producer: Option<Box<dyn FnOnce() -> T + Send + 'static>>,
    pending: Option<Receiver<T>>,
    result: Option<T>,
}

impl<T: Send + 'static> AsyncWorkUnit<T> {
    /// Creates an asynchronous unit around a one-shot producer.
    ///
    /// The producer runs on its own thread, spawned the first time the
    /// scheduler executes this unit.
    pub fn new(name: impl Into<String>, producer: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            name: name.into(),
            producer: Some(Box::new(producer)),
            pending: None,
            result: None,
        }
    }

    /// Returns whether the background task has delivered its result.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Takes the delivered result, if any.
    pub fn take_result(&mut self) -> Option<T> {
        self.result.take()
    }
}

impl<T: Send + 'static> WorkUnit for AsyncWorkUnit<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<(), UnitError> {
        if let Some(producer) = self.producer.take() {
            let (sender, receiver) = bounded(1);
            std::thread::Builder::new()
                .name(format!("{}-async", self.name))
                .spawn(move || {
                    // Receiver dropped means the unit was removed; the
                    // result is simply discarded.
                    let _ = sender.send(producer());
                })?;
            self.pending = Some(receiver);
            return Ok(());
        }

        if let Some(receiver) = &self.pending {
            match receiver.try_recv() {
                Ok(value) => {
                    self.result = Some(value);
                    self.pending = None;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.pending = None;
                    return Err("background task exited without a result".into());
                }
            }
        }
        Ok(())
    }
}
