//! Admission error types.

use thiserror::Error;

/// Why a join code was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("not found")]
    NotFound,

    #[error("expired")]
    Expired,

    #[error("exhausted")]
    Exhausted,

    #[error("no unused join code after {0} draws")]
    CodeSpaceExhausted(u32),

    #[error("failed to gather entropy: {0}")]
    Entropy(String),
}

pub type AdmissionResult<T> = Result<T, AdmissionError>;
