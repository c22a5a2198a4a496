//! Errors that stop a whole job.

use std::path::PathBuf;

use thiserror::Error;

use crate::download::PoolError;
use crate::job::InvalidTransition;
use crate::plan::PlanningError;

/// Job-level failures. Per-page and per-part problems are reported in the
/// [`JobReport`](super::JobReport) instead.
#[derive(Debug, Error)]
pub enum JobError {
    /// Planning rejected the job before any download.
    #[error("planning failed for job {job_id}: {source}")]
    Planning {
        /// Job identifier.
        job_id: String,
        /// The planner error.
        #[source]
        source: PlanningError,
    },

    /// The page store could not be prepared.
    #[error("page store unavailable at {path}: {source}")]
    Store {
        /// Staging directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The fetch pool could not be built or stopped unexpectedly.
    #[error("fetch pool error: {source}")]
    Pool {
        /// The pool error.
        #[source]
        source: PoolError,
    },

    /// The job was driven through a disallowed status change.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
}

impl JobError {
    pub(crate) fn planning(job_id: impl Into<String>, source: PlanningError) -> Self {
        Self::Planning {
            job_id: job_id.into(),
            source,
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }
}
