//! Bounded worker pool fetching the pages of one part.
//!
//! # Concurrency model
//!
//! - each page runs in its own Tokio task
//! - a semaphore permit is acquired before a page is dispatched and released
//!   when its task ends (RAII)
//! - pause and cancel are checked before every dispatch and before every
//!   retry; in-flight requests are never interrupted
//! - pages already present in the page store are reported as succeeded
//!   without a request
//!
//! Every state change of a [`PageTask`] is handed to the caller's sink as it
//! happens. Page bodies go to the page store, never to memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::rate_limiter::{HostThrottle, parse_retry_after};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use super::store::PageStore;
use super::timeout::request_timeout;
use super::{HttpClient, PageFetchError};
use crate::plan::DownloadPart;
use crate::profile::LibraryProfile;
use crate::progress::ProgressTracker;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 32;

/// Concurrency used when neither the profile nor the config sets one.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Error type for worker pool operations.
///
/// Per-page failures never surface here; they are reported through the sink.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Lifecycle of a single page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Created, not dispatched yet.
    Pending,
    /// A request is in flight.
    Downloading,
    /// Stored in the page store. Terminal.
    Succeeded,
    /// Last attempt failed; another one is scheduled.
    FailedRetryable,
    /// Given up on. Terminal.
    FailedPermanent,
}

impl PageState {
    /// Returns true for `Succeeded` and `FailedPermanent`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }
}

/// The unit of work for one page. Mutated only by the worker running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    /// 1-based page number within the manuscript.
    pub page_number: u32,
    /// Page image URL.
    pub url: String,
    /// Attempts made so far; zero for pages restored from the page store.
    pub attempt: u32,
    /// Current state.
    pub state: PageState,
    /// Bytes stored (set on success).
    pub bytes: u64,
    /// Message of the most recent failure.
    pub error: Option<String>,
}

impl PageTask {
    /// Creates a pending task.
    #[must_use]
    pub fn new(page_number: u32, url: impl Into<String>) -> Self {
        Self {
            page_number,
            url: url.into(),
            attempt: 0,
            state: PageState::Pending,
            bytes: 0,
            error: None,
        }
    }

    fn fail(&mut self, state: PageState, error: &PageFetchError) {
        self.state = state;
        self.error = Some(error.to_string());
    }
}

/// Receives every page task transition.
pub type PageSink = Arc<dyn Fn(&PageTask) + Send + Sync>;

/// Per-job fetch settings derived from the library profile and config.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Pages in flight at once.
    pub concurrency: usize,
    /// Retry behavior per page.
    pub retry_policy: RetryPolicy,
    /// Timeout of a single page request.
    pub request_timeout: Duration,
    /// Active time the job's download phase may take; `None` for no limit.
    pub download_budget: Option<Duration>,
    /// Minimum spacing between requests to one host.
    pub min_request_interval: Duration,
}

impl FetchOptions {
    /// Derives options for `profile` from global defaults.
    #[must_use]
    pub fn for_profile(
        profile: &LibraryProfile,
        base_retry: &RetryPolicy,
        default_concurrency: usize,
        base_request_timeout: Duration,
    ) -> Self {
        Self {
            concurrency: profile.concurrency(default_concurrency),
            retry_policy: base_retry.with_backoff(&profile.backoff),
            request_timeout: request_timeout(base_request_timeout, profile.timeout_multiplier),
            download_budget: None,
            min_request_interval: profile.min_request_interval,
        }
    }

    /// Sets the download-phase budget.
    #[must_use]
    pub fn with_download_budget(mut self, budget: Duration) -> Self {
        self.download_budget = Some(budget);
        self
    }
}

/// Outcome counts of one part's fetch phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Pages fetched over the network.
    pub fetched: u32,
    /// Pages found already staged.
    pub restored: u32,
    /// Pages that failed permanently, ascending.
    pub failed: Vec<u32>,
    /// Retry attempts made.
    pub retried: u32,
    /// Whether the job was cancelled before every page of the part finished.
    pub cancelled: bool,
}

impl FetchSummary {
    fn record(&mut self, task: &PageTask) {
        match task.state {
            PageState::Succeeded if task.attempt == 0 => self.restored += 1,
            PageState::Succeeded => self.fetched += 1,
            PageState::FailedPermanent => self.failed.push(task.page_number),
            PageState::Pending | PageState::Downloading | PageState::FailedRetryable => {}
        }
        self.retried += task.attempt.saturating_sub(1);
    }
}

/// Semaphore-bounded page fetcher, one per job.
#[derive(Debug)]
pub struct FetchWorkerPool {
    client: HttpClient,
    store: PageStore,
    tracker: ProgressTracker,
    throttle: Arc<HostThrottle>,
    semaphore: Arc<Semaphore>,
    options: FetchOptions,
}

impl FetchWorkerPool {
    /// Creates a pool writing into `store` and gated by `tracker`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConcurrency`] if the concurrency is
    /// outside 1-32.
    #[instrument(level = "debug", skip_all, fields(concurrency = options.concurrency))]
    pub fn new(
        client: HttpClient,
        store: PageStore,
        tracker: ProgressTracker,
        options: FetchOptions,
    ) -> Result<Self, PoolError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&options.concurrency) {
            return Err(PoolError::InvalidConcurrency {
                value: options.concurrency,
            });
        }
        debug!(
            max_attempts = options.retry_policy.max_attempts(),
            request_timeout_ms = options.request_timeout.as_millis(),
            "creating fetch worker pool"
        );
        Ok(Self {
            client,
            store,
            tracker,
            throttle: Arc::new(HostThrottle::new(options.min_request_interval)),
            semaphore: Arc::new(Semaphore::new(options.concurrency)),
            options,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    /// Returns the page store this pool writes to.
    #[must_use]
    pub fn store(&self) -> &PageStore {
        &self.store
    }

    fn budget_left(&self) -> Option<Duration> {
        self.options
            .download_budget
            .map(|budget| budget.saturating_sub(self.tracker.active_elapsed()))
    }

    /// Fetches every page of `part`, streaming transitions to `sink`.
    ///
    /// Returns once every dispatched page reached a terminal state or was
    /// abandoned because of cancellation. A part with abandoned pages is
    /// reported as cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self, part, sink), fields(part = part.number(), pages = part.page_count()))]
    pub async fn download(
        &self,
        part: &DownloadPart,
        sink: PageSink,
    ) -> Result<FetchSummary, PoolError> {
        let mut summary = FetchSummary::default();
        let mut handles = Vec::with_capacity(part.page_count());

        for (page_number, url) in part.pages() {
            if !self.tracker.wait_until_dispatchable().await {
                summary.cancelled = true;
                break;
            }

            let mut task = PageTask::new(page_number, url);

            if self.budget_left().is_some_and(|left| left.is_zero()) {
                task.fail(PageState::FailedPermanent, &PageFetchError::deadline(url));
                sink(&task);
                summary.record(&task);
                continue;
            }

            if let Some(bytes) = self.store.staged_size(page_number).await {
                debug!(page_number, bytes, "page already staged");
                task.state = PageState::Succeeded;
                task.bytes = bytes;
                sink(&task);
                summary.record(&task);
                continue;
            }

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| PoolError::SemaphoreClosed)?;

            // A pause or cancel may have arrived while waiting for a slot.
            if !self.tracker.wait_until_dispatchable().await {
                summary.cancelled = true;
                break;
            }

            let worker = PageWorker {
                client: self.client.clone(),
                throttle: Arc::clone(&self.throttle),
                tracker: self.tracker.clone(),
                retry_policy: self.options.retry_policy.clone(),
                request_timeout: self.options.request_timeout,
                download_budget: self.options.download_budget,
                dest: self.store.page_path(page_number),
                sink: Arc::clone(&sink),
            };
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                worker.run(task).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(task) => {
                    // Workers stop between retries on cancel, leaving the page unfinished.
                    if !task.state.is_terminal() {
                        summary.cancelled = true;
                    }
                    summary.record(&task);
                }
                Err(e) => warn!(error = %e, "page worker panicked"),
            }
        }
        if self.tracker.is_cancelled() {
            summary.cancelled = true;
        }
        summary.failed.sort_unstable();

        info!(
            fetched = summary.fetched,
            restored = summary.restored,
            failed = summary.failed.len(),
            retried = summary.retried,
            cancelled = summary.cancelled,
            "part fetch finished"
        );
        Ok(summary)
    }
}

struct PageWorker {
    client: HttpClient,
    throttle: Arc<HostThrottle>,
    tracker: ProgressTracker,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
    download_budget: Option<Duration>,
    dest: std::path::PathBuf,
    sink: PageSink,
}

impl PageWorker {
    fn emit(&self, task: &PageTask) {
        (self.sink)(task);
    }

    /// Reads Retry-After from 429/503 responses and blocks the host for it.
    async fn server_delay(&self, error: &PageFetchError, url: &str) -> Option<Duration> {
        let PageFetchError::HttpStatus {
            status: 429 | 503,
            retry_after: Some(value),
            ..
        } = error
        else {
            return None;
        };
        let delay = parse_retry_after(value)?;
        self.throttle.record_cooldown(url, delay).await;
        debug!(url, retry_after = %value, delay_ms = delay.as_millis(), "using Retry-After delay");
        Some(delay)
    }

    fn budget_allows(&self, delay: Duration) -> bool {
        self.download_budget
            .is_none_or(|budget| self.tracker.active_elapsed() + delay < budget)
    }

    #[instrument(skip(self, task), fields(page = task.page_number, url = %task.url))]
    async fn run(self, mut task: PageTask) -> PageTask {
        loop {
            task.attempt += 1;
            task.state = PageState::Downloading;
            task.error = None;
            self.emit(&task);

            self.throttle.acquire(&task.url).await;

            let error = match self
                .client
                .fetch_to_file(&task.url, &self.dest, self.request_timeout)
                .await
            {
                Ok(bytes) => {
                    task.bytes = bytes;
                    task.state = PageState::Succeeded;
                    self.emit(&task);
                    return task;
                }
                Err(error) => error,
            };

            let server_delay = self.server_delay(&error, &task.url).await;
            match self
                .retry_policy
                .should_retry(classify_error(&error), task.attempt)
            {
                RetryDecision::Retry {
                    delay: backoff,
                    attempt: next_attempt,
                } => {
                    let delay = server_delay.unwrap_or(backoff);
                    if !self.budget_allows(delay) {
                        warn!(error = %error, "download deadline reached, giving up on page");
                        task.fail(PageState::FailedPermanent, &PageFetchError::deadline(&task.url));
                        self.emit(&task);
                        return task;
                    }

                    task.fail(PageState::FailedRetryable, &error);
                    self.emit(&task);
                    info!(
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = server_delay.is_some(),
                        error = %error,
                        "retrying page"
                    );
                    tokio::time::sleep(delay).await;

                    if !self.tracker.wait_until_dispatchable().await {
                        debug!("cancelled before retry");
                        return task;
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(error = %error, %reason, attempts = task.attempt, "page failed");
                    task.fail(PageState::FailedPermanent, &error);
                    self.emit(&task);
                    return task;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::job::JobStatus;
    use crate::plan::PageRange;
    use crate::test_support::{jpeg_page_bytes, start_mock_server_or_skip};
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn options(concurrency: usize) -> FetchOptions {
        FetchOptions {
            concurrency,
            retry_policy: RetryPolicy::new(
                3,
                Duration::from_millis(10),
                Duration::from_millis(40),
                2.0,
            ),
            request_timeout: Duration::from_secs(5),
            download_budget: None,
            min_request_interval: Duration::ZERO,
        }
    }

    async fn pool(dir: &TempDir, concurrency: usize) -> (FetchWorkerPool, ProgressTracker) {
        let tracker = ProgressTracker::new("job", 3);
        tracker.transition(JobStatus::Running).unwrap();
        let store = PageStore::open(dir.path(), "job").await.unwrap();
        let client = HttpClient::new(Duration::from_secs(5)).unwrap();
        let pool = FetchWorkerPool::new(client, store, tracker.clone(), options(concurrency))
            .unwrap();
        (pool, tracker)
    }

    fn recording_sink() -> (PageSink, Arc<Mutex<Vec<PageTask>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: PageSink = Arc::new(move |task: &PageTask| sink_seen.lock().push(task.clone()));
        (sink, seen)
    }

    #[test]
    fn test_for_profile_applies_library_tuning() {
        let profile = LibraryProfile {
            max_concurrent_downloads: Some(2),
            timeout_multiplier: 2.0,
            ..LibraryProfile::neutral("morgan")
        };
        let options = FetchOptions::for_profile(
            &profile,
            &RetryPolicy::default(),
            DEFAULT_CONCURRENCY,
            Duration::from_secs(30),
        );
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.request_timeout, Duration::from_secs(60));
        assert_eq!(options.download_budget, None);
    }

    #[tokio::test]
    async fn test_pool_rejects_invalid_concurrency() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::open(dir.path(), "job").await.unwrap();
        let client = HttpClient::new(Duration::from_secs(1)).unwrap();
        let result =
            FetchWorkerPool::new(client, store, ProgressTracker::new("job", 1), options(0));
        assert!(matches!(
            result,
            Err(PoolError::InvalidConcurrency { value: 0 })
        ));
    }

    #[tokio::test]
    async fn test_download_streams_transitions_and_stores_pages() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        for page in 1..=3u32 {
            Mock::given(method("GET"))
                .and(path(format!("/p/{page}.jpg")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_page_bytes(page)))
                .mount(&server)
                .await;
        }
        let dir = TempDir::new().unwrap();
        let (pool, _tracker) = pool(&dir, 2).await;
        let links = (1..=3)
            .map(|p| format!("{}/p/{p}.jpg", server.uri()))
            .collect();
        let part = DownloadPart {
            part_index: 0,
            total_parts: 1,
            range: PageRange::new(1, 3),
            page_links: links,
        };

        let (sink, seen) = recording_sink();
        let summary = pool.download(&part, sink).await.unwrap();

        assert_eq!(summary.fetched, 3);
        assert!(summary.failed.is_empty());
        let seen = seen.lock();
        for page in 1..=3 {
            let states: Vec<PageState> = seen
                .iter()
                .filter(|t| t.page_number == page)
                .map(|t| t.state)
                .collect();
            assert_eq!(states, vec![PageState::Downloading, PageState::Succeeded]);
            assert!(pool.store().page_path(page).exists());
        }
    }

    #[tokio::test]
    async fn test_staged_pages_are_not_refetched() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_page_bytes(9)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (pool, _tracker) = pool(&dir, 1).await;
        std::fs::write(pool.store().page_path(1), jpeg_page_bytes(1)).unwrap();
        let part = DownloadPart {
            part_index: 0,
            total_parts: 1,
            range: PageRange::new(1, 2),
            page_links: vec![
                format!("{}/p/1.jpg", server.uri()),
                format!("{}/p/2.jpg", server.uri()),
            ],
        };

        let (sink, seen) = recording_sink();
        let summary = pool.download(&part, sink).await.unwrap();

        assert_eq!(summary.restored, 1);
        assert_eq!(summary.fetched, 1);
        let first = seen.lock().iter().find(|t| t.page_number == 1).cloned().unwrap();
        assert_eq!(first.state, PageState::Succeeded);
        assert_eq!(first.attempt, 0);
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails_pages_without_requests() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_page_bytes(1)))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new("job", 2);
        tracker.transition(JobStatus::Running).unwrap();
        let store = PageStore::open(dir.path(), "job").await.unwrap();
        let client = HttpClient::new(Duration::from_secs(5)).unwrap();
        let pool = FetchWorkerPool::new(
            client,
            store,
            tracker,
            options(2).with_download_budget(Duration::ZERO),
        )
        .unwrap();
        let part = DownloadPart {
            part_index: 0,
            total_parts: 1,
            range: PageRange::new(1, 2),
            page_links: vec![
                format!("{}/a.jpg", server.uri()),
                format!("{}/b.jpg", server.uri()),
            ],
        };

        let (sink, seen) = recording_sink();
        let summary = pool.download(&part, sink).await.unwrap();

        assert_eq!(summary.failed, vec![1, 2]);
        assert!(seen.lock().iter().all(|t| t.state == PageState::FailedPermanent));
    }

    #[tokio::test]
    async fn test_cancelled_tracker_dispatches_nothing() {
        let dir = TempDir::new().unwrap();
        let (pool, tracker) = pool(&dir, 2).await;
        tracker.cancel().unwrap();
        let part = DownloadPart {
            part_index: 0,
            total_parts: 1,
            range: PageRange::new(1, 1),
            page_links: vec!["http://127.0.0.1:9/never.jpg".to_string()],
        };

        let (sink, seen) = recording_sink();
        let summary = pool.download(&part, sink).await.unwrap();

        assert!(summary.cancelled);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_retry_backoff_marks_part_cancelled() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/ok.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_page_bytes(4)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy.jpg"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new("job", 2);
        tracker.transition(JobStatus::Running).unwrap();
        let store = PageStore::open(dir.path(), "job").await.unwrap();
        let client = HttpClient::new(Duration::from_secs(5)).unwrap();
        let slow_retry = FetchOptions {
            retry_policy: RetryPolicy::new(
                3,
                Duration::from_millis(800),
                Duration::from_millis(800),
                2.0,
            ),
            ..options(2)
        };
        let pool = FetchWorkerPool::new(client, store, tracker.clone(), slow_retry).unwrap();
        let part = DownloadPart {
            part_index: 0,
            total_parts: 1,
            range: PageRange::new(1, 2),
            page_links: vec![
                format!("{}/ok.jpg", server.uri()),
                format!("{}/busy.jpg", server.uri()),
            ],
        };

        let canceller = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                tracker.cancel().unwrap();
            })
        };
        let (sink, seen) = recording_sink();
        let summary = pool.download(&part, sink).await.unwrap();
        canceller.await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.fetched, 1);
        assert!(summary.failed.is_empty());
        let last_busy = seen
            .lock()
            .iter()
            .rev()
            .find(|t| t.page_number == 2)
            .map(|t| t.state);
        assert_eq!(last_busy, Some(PageState::FailedRetryable));
    }
}
