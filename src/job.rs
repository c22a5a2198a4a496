//! Manuscript job descriptor and status state machine.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::discovery::{DiscoveredManuscript, DiscoveryError};
use crate::profile::LibraryProfile;

/// Fallback per-page size estimate when neither discovery nor the profile has one.
pub const DEFAULT_BYTES_PER_PAGE: u64 = 800 * 1024;

/// Lifecycle status of a job.
///
/// ```text
/// queued → running → {paused ⇄ running} → {completed | failed | cancelled}
/// ```
///
/// `queued` and `paused` jobs may also be cancelled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Returns true for `completed`, `failed` and `cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns whether the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use JobStatus::{Cancelled, Completed, Failed, Paused, Queued, Running};
        matches!(
            (self, next),
            (Queued | Paused, Running)
                | (Running, Paused | Completed | Failed)
                | (Queued | Running | Paused, Cancelled)
        )
    }

    /// Lowercase name used in logs and snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job status transition from {from} to {to}")]
pub struct InvalidTransition {
    /// Status at the time of the request.
    pub from: JobStatus,
    /// Requested status.
    pub to: JobStatus,
}

/// One user-requested manuscript download.
///
/// Immutable once built. Its status lives in the job's
/// [`ProgressTracker`](crate::progress::ProgressTracker), which is the only
/// state shared with observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManuscriptJob {
    /// Job identifier; also names the page store directory.
    pub id: String,
    /// Normalized library source identifier.
    pub source_id: String,
    /// Human-readable title; output PDFs are named after it.
    pub display_name: String,
    /// Number of pages.
    pub total_pages: u32,
    /// One URL per page, in page order.
    pub page_links: Vec<String>,
    /// Estimated size of all page images.
    pub estimated_total_bytes: u64,
}

impl ManuscriptJob {
    /// Builds a job from a validated discovery result.
    ///
    /// The size estimate uses the discovery's per-page figure when present,
    /// else the library profile's, else [`DEFAULT_BYTES_PER_PAGE`].
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the discovery result is inconsistent.
    pub fn from_discovery(
        id: impl Into<String>,
        manuscript: DiscoveredManuscript,
        profile: &LibraryProfile,
    ) -> Result<Self, DiscoveryError> {
        manuscript.validate()?;
        let total_pages = u32::try_from(manuscript.total_pages)
            .map_err(|_| DiscoveryError::invalid("page count does not fit in 32 bits"))?;

        let per_page = manuscript
            .bytes_per_page_estimate()
            .unwrap_or_else(|| profile.bytes_per_page(DEFAULT_BYTES_PER_PAGE));

        Ok(Self {
            id: id.into(),
            source_id: profile.source_id.clone(),
            display_name: manuscript.display_name,
            total_pages,
            page_links: manuscript.page_links,
            estimated_total_bytes: per_page.saturating_mul(u64::from(total_pages)),
        })
    }
}
