//! Page fetching: HTTP client, retry, throttling, staging and the worker pool.
//!
//! # Features
//!
//! - Streaming page bodies to an on-disk page store (never whole parts in memory)
//! - Semaphore-bounded concurrency per library profile
//! - Exponential backoff with jitter; Retry-After honored on 429/503
//! - Per-host request spacing and server cooldowns
//! - Size and signature checks that reject HTML error pages served as 200
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use manuscript_core::download::{
//!     FetchOptions, FetchWorkerPool, HttpClient, PageSink, PageStore, PageTask, RetryPolicy,
//! };
//! use manuscript_core::plan::PartPlanner;
//! use manuscript_core::profile::LibraryProfileRegistry;
//! use manuscript_core::progress::ProgressTracker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = LibraryProfileRegistry::builtin();
//! let profile = registry.get("graz");
//! let links = vec!["https://example.org/page/1.jpg".to_string()];
//! let parts = PartPlanner::new(800 * 1024 * 1024).plan_parts(1, 819_200, profile, &links)?;
//!
//! let tracker = ProgressTracker::new("job-1", 1);
//! let store = PageStore::open(std::path::Path::new("/tmp/pages"), "job-1").await?;
//! let options =
//!     FetchOptions::for_profile(profile, &RetryPolicy::default(), 4, Duration::from_secs(30));
//! let client = HttpClient::new(Duration::from_secs(30))?;
//! let pool = FetchWorkerPool::new(client, store, tracker, options)?;
//!
//! let sink: PageSink = Arc::new(|task: &PageTask| {
//!     println!("page {} -> {:?}", task.page_number, task.state);
//! });
//! let summary = pool.download(&parts[0], sink).await?;
//! println!("fetched {}, failed {:?}", summary.fetched, summary.failed);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod pool;
pub mod rate_limiter;
mod retry;
mod store;
pub mod timeout;

pub use client::HttpClient;
pub use error::PageFetchError;
pub use pool::{
    DEFAULT_CONCURRENCY, FetchOptions, FetchSummary, FetchWorkerPool, PageSink, PageState,
    PageTask, PoolError,
};
pub use rate_limiter::{HostThrottle, extract_domain, parse_retry_after};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision,
    RetryPolicy, classify_error,
};
pub use store::PageStore;
pub use timeout::{effective_timeout, job_page_multiplier, page_count_multiplier, request_timeout};
