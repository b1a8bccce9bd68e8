//! # Scheduler Error Types
//!
//! Configuration errors only. Claim races are not errors: a lost
//! compare-and-swap is expected, silent, and handled by scanning onward.

use thiserror::Error;

use crate::unit::{MonopolyId, UnitId};

/// Errors that can occur while configuring or driving the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The declared dependencies form a cycle; no valid frame can run.
    #[error("dependency cycle detected through units: {units:?}")]
    DependencyCycle {
        /// Names of the units on the detected cycle, in walk order.
        units: Vec<String>,
    },

    /// A topology or configuration mutation was attempted while the
    /// scheduler was busy, either with an executing frame or with another
    /// configuration call. The mutation is rejected, never queued.
    #[error("scheduler is busy with a frame or another configuration call")]
    MutationMidFrame,

    /// A second `run_one_frame` call raced an in-progress frame.
    #[error("a frame is already executing")]
    FrameInProgress,

    /// The referenced unit was never registered or has been removed.
    #[error("unknown or removed work unit: {0:?}")]
    UnknownUnit(UnitId),

    /// The referenced monopoly unit was never registered or has been
    /// removed.
    #[error("unknown or removed monopoly unit: {0:?}")]
    UnknownMonopoly(MonopolyId),

    /// A unit was asked to depend on itself.
    #[error("unit {0:?} cannot depend on itself")]
    SelfDependency(UnitId),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
