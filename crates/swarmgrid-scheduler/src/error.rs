//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur when feeding jobs to the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job already queued: {0}")]
    DuplicateJob(String),

    #[error("job id must not be empty")]
    EmptyJobId,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
