//! Manuscript Downloader Core Library
//!
//! Everything downstream of page discovery for large digitized manuscripts:
//! splitting oversized jobs into parts, fetching page images concurrently
//! with per-library pacing and retries, tracking resumable progress, and
//! assembling pages into PDFs under a bounded memory budget.
//!
//! # Architecture
//!
//! - [`profile`] - Per-library tuning with a typed fallback
//! - [`plan`] - Auto-split planning into contiguous page ranges
//! - [`download`] - HTTP client, retry, throttling, page store and worker pool
//! - [`progress`] - Observable job progress with pause/resume/cancel
//! - [`pdf`] - Streaming, order-preserving PDF assembly
//! - [`orchestrator`] - Per-job coordination of all of the above
//! - [`discovery`] - The page discovery contract consumed by the core
//! - [`config`] - TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use manuscript_core::{
//!     CoreConfig, HttpClient, JobSettings, ManifestFileDiscovery, ManuscriptJob,
//!     ManuscriptJobOrchestrator, PageDiscovery,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::load_or_default(None)?;
//! let manuscript = ManifestFileDiscovery.discover_pages("manifest.json").await?;
//! let profile = config.registry().get("graz").clone();
//! let job = ManuscriptJob::from_discovery("graz-codex-12", manuscript, &profile)?;
//!
//! let client = HttpClient::new(config.connect_timeout())?;
//! let orchestrator =
//!     ManuscriptJobOrchestrator::new(job, profile, client, JobSettings::from_config(&config));
//! let report = orchestrator.start().await?;
//! println!("{:?}: {} pages missing", report.outcome, report.skipped_pages.len());
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod discovery;
pub mod download;
pub mod job;
pub mod orchestrator;
pub mod output;
pub mod pdf;
pub mod plan;
pub mod profile;
pub mod progress;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, CoreConfig};
pub use discovery::{DiscoveredManuscript, DiscoveryError, ManifestFileDiscovery, PageDiscovery};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, FailureType, FetchOptions, FetchWorkerPool,
    HttpClient, PageFetchError, PageState, PageStore, PageTask, RetryDecision, RetryPolicy,
    classify_error,
};
pub use job::{InvalidTransition, JobStatus, ManuscriptJob};
pub use orchestrator::{
    JobError, JobOutcome, JobReport, JobSettings, ManuscriptJobOrchestrator, PartReport,
    PartStatus,
};
pub use pdf::{AssembledPart, AssemblyError, ImageBuffer, PdfAssembler, SkippedPage};
pub use plan::{DownloadPart, PageRange, PartPlanner, PlanningError};
pub use profile::{LibraryProfile, LibraryProfileRegistry};
pub use progress::{ProgressSnapshot, ProgressTracker};
