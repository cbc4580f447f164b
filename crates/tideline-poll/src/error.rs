//! Poll scheduler error types.

use thiserror::Error;

use tideline_core::ImageParseError;

/// Errors that can occur while scanning or registering watches.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("failed to list tracked images: {0:#}")]
    ListFailure(#[source] anyhow::Error),

    #[error("a scan is already in progress")]
    ScanInProgress,

    #[error("invalid schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    #[error("invalid image: {0}")]
    InvalidImage(#[from] ImageParseError),
}

/// Result alias for poll operations.
pub type PollResult<T> = Result<T, PollError>;
