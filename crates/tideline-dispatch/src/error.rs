//! Dispatch error types.

use thiserror::Error;

use tideline_core::{ImageParseError, ValuesError};

/// Errors that can occur while matching or upgrading releases.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to list releases: {0:#}")]
    ListReleases(#[source] anyhow::Error),

    #[error("invalid notification image: {0}")]
    Notification(#[from] ImageParseError),

    #[error("values error: {0}")]
    Values(#[from] ValuesError),

    #[error("failed to upgrade release {release}: {source:#}")]
    Upgrade {
        release: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("update pipeline is closed")]
    PipelineClosed,
}

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
