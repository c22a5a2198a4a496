//! Error types for part planning.

use thiserror::Error;

/// Errors raised before any download starts because the job cannot be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    /// The manuscript reports no pages.
    #[error("invalid page count {total_pages}: a manuscript needs at least one page")]
    InvalidPageCount {
        /// The rejected page count.
        total_pages: i64,
    },

    /// A split was requested into zero parts.
    #[error("invalid part count: at least one part is required")]
    InvalidPartCount,

    /// Neither the library profile nor the global settings define a threshold.
    #[error("invalid auto-split threshold: must be greater than zero")]
    InvalidThreshold,

    /// The page link list does not match the page count.
    #[error("page link count mismatch: expected {expected} links, got {actual}")]
    LinkCountMismatch {
        /// Number of links the plan requires.
        expected: usize,
        /// Number of links supplied.
        actual: usize,
    },
}
