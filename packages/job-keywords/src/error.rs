//! Typed errors for the submission and sync workflows.
//!
//! Infrastructure traits return `anyhow::Result`; the domain converts those
//! failures into one of these kinds at the point where the meaning is known.

use std::time::Duration;
use thiserror::Error;

use crate::common::JobId;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the job and keyword workflows.
#[derive(Debug, Error)]
pub enum JobError {
    /// No signed-in session; nothing was written.
    #[error("user must be authenticated to {0}")]
    Unauthenticated(&'static str),

    /// A row insert or update failed; later steps were not attempted.
    #[error("failed to {action}: {source}")]
    RemoteWrite {
        action: &'static str,
        #[source]
        source: BoxError,
    },

    /// The extraction function reported an error.
    #[error("processing failed: {0}")]
    Processor(#[source] BoxError),

    /// The extraction function did not answer in time. The call was left
    /// running and the job record was not touched.
    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    /// A read (session, query, subscription) failed.
    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: BoxError,
    },

    /// The job record does not exist or belongs to another user.
    #[error("job posting {0} not found")]
    NotFound(JobId),
}

impl JobError {
    pub(crate) fn write(action: &'static str, source: anyhow::Error) -> Self {
        JobError::RemoteWrite {
            action,
            source: source.into(),
        }
    }

    pub(crate) fn fetch(what: &'static str, source: anyhow::Error) -> Self {
        JobError::Fetch {
            what,
            source: source.into(),
        }
    }
}

/// Result type alias for domain operations.
pub type Result<T> = std::result::Result<T, JobError>;
