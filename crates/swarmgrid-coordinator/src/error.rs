//! Coordinator error types.

use swarmgrid_admission::AdmissionError;
use swarmgrid_core::DeviceId;
use swarmgrid_scheduler::SchedulerError;
use thiserror::Error;

/// Errors surfaced by coordinator entry points.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("join code required")]
    JoinCodeRequired,

    #[error("connection already bound to device {0}")]
    ConnectionInUse(DeviceId),

    #[error("{0}")]
    AdmissionDenied(#[from] AdmissionError),

    #[error(transparent)]
    Job(#[from] SchedulerError),
}

impl CoordinatorError {
    /// Whether this error should be shown to a connecting device as a
    /// rejection.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            CoordinatorError::JoinCodeRequired
                | CoordinatorError::ConnectionInUse(_)
                | CoordinatorError::AdmissionDenied(_)
        )
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
