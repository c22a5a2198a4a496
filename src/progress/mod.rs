//! Progress aggregation and dispatch control for a running job.
//!
//! [`ProgressTracker`] is the only structure written by many workers at once.
//! Counters are atomics; the rest of the aggregate sits behind a
//! `parking_lot` mutex held only for short, non-async sections. Observers
//! either poll [`ProgressTracker::snapshot`] or subscribe to a watch channel
//! that receives a fresh [`ProgressSnapshot`] after every state change.
//!
//! The tracker also carries the job's control state: pause and cancel are
//! requests recorded here and honored by the fetch pool before it dispatches
//! the next page.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::download::{PageState, PageTask};
use crate::job::{InvalidTransition, JobStatus};

/// A page task transition as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTaskEvent {
    /// 1-based page number.
    pub page_number: u32,
    /// State the task moved into.
    pub state: PageState,
    /// Bytes stored for the page (meaningful on success).
    pub bytes: u64,
    /// Attempt number; zero when the page was restored from the page store.
    pub attempt: u32,
}

impl From<&PageTask> for PageTaskEvent {
    fn from(task: &PageTask) -> Self {
        Self {
            page_number: task.page_number,
            state: task.state,
            bytes: task.bytes,
            attempt: task.attempt,
        }
    }
}

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Job identifier.
    pub job_id: String,
    /// Current status.
    pub status: JobStatus,
    /// 1-based index of the part being processed (0 before the first part).
    pub part_index: usize,
    /// Number of planned parts (0 before planning).
    pub total_parts: usize,
    /// Pages stored successfully so far. Never decreases.
    pub pages_completed: u32,
    /// Pages that failed permanently.
    pub pages_failed: u32,
    /// Total pages of the job.
    pub total_pages: u32,
    /// Bytes fetched or restored so far.
    pub bytes_downloaded: u64,
    /// Estimated seconds until all pages are fetched, once a rate is known.
    pub eta_seconds: Option<u64>,
    /// Pages given up on, in ascending order.
    pub skipped_pages: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Running,
    Paused,
    Cancelled,
}

#[derive(Debug)]
struct TrackerState {
    status: JobStatus,
    part_index: usize,
    total_parts: usize,
    skipped_pages: Vec<u32>,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

#[derive(Debug)]
struct Inner {
    job_id: String,
    total_pages: u32,
    pages_completed: AtomicU32,
    pages_failed: AtomicU32,
    pages_fetched: AtomicU32,
    bytes_downloaded: AtomicU64,
    state: Mutex<TrackerState>,
    dispatch: watch::Sender<Dispatch>,
    snapshots: watch::Sender<ProgressSnapshot>,
}

/// Thread-safe progress aggregate and control surface for one job.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    /// Creates a tracker for a queued job.
    #[must_use]
    pub fn new(job_id: impl Into<String>, total_pages: u32) -> Self {
        let job_id = job_id.into();
        let initial = ProgressSnapshot {
            job_id: job_id.clone(),
            status: JobStatus::Queued,
            part_index: 0,
            total_parts: 0,
            pages_completed: 0,
            pages_failed: 0,
            total_pages,
            bytes_downloaded: 0,
            eta_seconds: None,
            skipped_pages: Vec::new(),
        };
        let (dispatch, _) = watch::channel(Dispatch::Running);
        let (snapshots, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                job_id,
                total_pages,
                pages_completed: AtomicU32::new(0),
                pages_failed: AtomicU32::new(0),
                pages_fetched: AtomicU32::new(0),
                bytes_downloaded: AtomicU64::new(0),
                state: Mutex::new(TrackerState {
                    status: JobStatus::Queued,
                    part_index: 0,
                    total_parts: 0,
                    skipped_pages: Vec::new(),
                    started_at: None,
                    paused_at: None,
                    paused_total: Duration::ZERO,
                }),
                dispatch,
                snapshots,
            }),
        }
    }

    /// Records a page task transition.
    pub fn observe(&self, event: PageTaskEvent) {
        let inner = &self.inner;
        match event.state {
            PageState::Succeeded => {
                inner.pages_completed.fetch_add(1, Ordering::SeqCst);
                inner.bytes_downloaded.fetch_add(event.bytes, Ordering::SeqCst);
                if event.attempt > 0 {
                    inner.pages_fetched.fetch_add(1, Ordering::SeqCst);
                }
            }
            PageState::FailedPermanent => {
                inner.pages_failed.fetch_add(1, Ordering::SeqCst);
                let mut state = inner.state.lock();
                if let Err(pos) = state.skipped_pages.binary_search(&event.page_number) {
                    state.skipped_pages.insert(pos, event.page_number);
                }
            }
            PageState::Pending | PageState::Downloading | PageState::FailedRetryable => {
                return;
            }
        }
        self.publish();
    }

    /// Records a page dropped while its part was assembled, e.g. an
    /// undecodable body that passed the fetch checks.
    ///
    /// The page stays in `pages_completed`. It is counted as failed and
    /// listed as skipped unless the fetch already reported it.
    pub fn record_assembly_skip(&self, page_number: u32) {
        let newly_skipped = {
            let mut state = self.inner.state.lock();
            match state.skipped_pages.binary_search(&page_number) {
                Ok(_) => false,
                Err(pos) => {
                    state.skipped_pages.insert(pos, page_number);
                    true
                }
            }
        };
        if newly_skipped {
            self.inner.pages_failed.fetch_add(1, Ordering::SeqCst);
            debug!(job_id = %self.inner.job_id, page_number, "page dropped during assembly");
            self.publish();
        }
    }

    /// Credits pages that need no work this run (e.g. a part whose PDF exists).
    pub fn credit_pages(&self, pages: u32, bytes: u64) {
        self.inner.pages_completed.fetch_add(pages, Ordering::SeqCst);
        self.inner.bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
        self.publish();
    }

    /// Records the planned part count.
    pub fn set_total_parts(&self, total_parts: usize) {
        self.inner.state.lock().total_parts = total_parts;
        self.publish();
    }

    /// Marks `part_index` (1-based) as the part being processed.
    pub fn begin_part(&self, part_index: usize) {
        self.inner.state.lock().part_index = part_index;
        debug!(job_id = %self.inner.job_id, part_index, "part started");
        self.publish();
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.inner.state.lock().status
    }

    /// Moves the job to `next` if the state machine allows it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when `next` is not reachable from the
    /// current status.
    pub fn transition(&self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        {
            let mut state = self.inner.state.lock();
            let current = state.status;
            if !current.can_transition_to(next) {
                return Err(InvalidTransition {
                    from: current,
                    to: next,
                });
            }
            let now = Instant::now();
            match next {
                JobStatus::Running => {
                    if state.started_at.is_none() {
                        state.started_at = Some(now);
                    }
                    if let Some(paused_at) = state.paused_at.take() {
                        state.paused_total += now - paused_at;
                    }
                }
                JobStatus::Paused => state.paused_at = Some(now),
                _ => {}
            }
            state.status = next;
            info!(job_id = %self.inner.job_id, from = %current, to = %next, "job status changed");
        }

        let dispatch = match next {
            JobStatus::Paused => Dispatch::Paused,
            JobStatus::Cancelled => Dispatch::Cancelled,
            _ => Dispatch::Running,
        };
        self.inner.dispatch.send_if_modified(|current| {
            // Cancellation is sticky.
            if *current == Dispatch::Cancelled || *current == dispatch {
                false
            } else {
                *current = dispatch;
                true
            }
        });
        self.publish();
        Ok(next)
    }

    /// Stops dispatch of new pages. In-flight fetches continue.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the job is running.
    pub fn pause(&self) -> Result<JobStatus, InvalidTransition> {
        self.transition(JobStatus::Paused)
    }

    /// Restarts dispatch after [`pause`](Self::pause).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the job is paused.
    pub fn resume(&self) -> Result<JobStatus, InvalidTransition> {
        let status = self.status();
        if status != JobStatus::Paused {
            return Err(InvalidTransition {
                from: status,
                to: JobStatus::Running,
            });
        }
        self.transition(JobStatus::Running)
    }

    /// Requests cancellation. Idempotent once cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the job already completed or failed.
    pub fn cancel(&self) -> Result<JobStatus, InvalidTransition> {
        if self.is_cancelled() {
            return Ok(JobStatus::Cancelled);
        }
        self.transition(JobStatus::Cancelled)
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.dispatch.borrow() == Dispatch::Cancelled
    }

    /// Returns whether dispatch is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.inner.dispatch.borrow() == Dispatch::Paused
    }

    /// Waits while the job is paused.
    ///
    /// Returns `true` when a new page may be dispatched and `false` once the
    /// job is cancelled.
    pub async fn wait_until_dispatchable(&self) -> bool {
        let mut rx = self.inner.dispatch.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            match current {
                Dispatch::Running => return true,
                Dispatch::Cancelled => return false,
                Dispatch::Paused => {
                    if rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Time spent running, excluding pauses.
    #[must_use]
    pub fn active_elapsed(&self) -> Duration {
        let state = self.inner.state.lock();
        Self::active_elapsed_locked(&state)
    }

    fn active_elapsed_locked(state: &TrackerState) -> Duration {
        let Some(started_at) = state.started_at else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        let paused_now = state.paused_at.map_or(Duration::ZERO, |at| now - at);
        (now - started_at).saturating_sub(state.paused_total + paused_now)
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.inner.state.lock();
        self.snapshot_locked(&state)
    }

    fn snapshot_locked(&self, state: &TrackerState) -> ProgressSnapshot {
        let inner = &self.inner;
        let pages_completed = inner.pages_completed.load(Ordering::SeqCst);
        let pages_failed = inner.pages_failed.load(Ordering::SeqCst);
        let pages_fetched = inner.pages_fetched.load(Ordering::SeqCst);

        let remaining = inner
            .total_pages
            .saturating_sub(pages_completed + pages_failed);
        let eta_seconds = estimate_eta(
            remaining,
            pages_fetched,
            Self::active_elapsed_locked(state),
        );

        ProgressSnapshot {
            job_id: inner.job_id.clone(),
            status: state.status,
            part_index: state.part_index,
            total_parts: state.total_parts,
            pages_completed,
            pages_failed,
            total_pages: inner.total_pages,
            bytes_downloaded: inner.bytes_downloaded.load(Ordering::SeqCst),
            eta_seconds,
            skipped_pages: state.skipped_pages.clone(),
        }
    }

    /// Subscribes to snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Builds and sends under the state lock, so a snapshot read earlier can
    /// never overwrite a newer one.
    fn publish(&self) {
        let state = self.inner.state.lock();
        let snapshot = self.snapshot_locked(&state);
        self.inner.snapshots.send_replace(snapshot);
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn estimate_eta(remaining: u32, fetched: u32, elapsed: Duration) -> Option<u64> {
    if remaining == 0 {
        return Some(0);
    }
    if fetched == 0 || elapsed.is_zero() {
        return None;
    }
    let per_page = elapsed.as_secs_f64() / f64::from(fetched);
    Some((per_page * f64::from(remaining)).ceil() as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(page_number: u32, state: PageState, bytes: u64) -> PageTaskEvent {
        PageTaskEvent {
            page_number,
            state,
            bytes,
            attempt: 1,
        }
    }

    #[test]
    fn test_observe_counts_terminal_transitions_only() {
        let tracker = ProgressTracker::new("job", 10);
        tracker.observe(event(1, PageState::Downloading, 0));
        tracker.observe(event(1, PageState::FailedRetryable, 0));
        tracker.observe(event(1, PageState::Succeeded, 4096));
        tracker.observe(event(2, PageState::FailedPermanent, 0));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.pages_completed, 1);
        assert_eq!(snapshot.pages_failed, 1);
        assert_eq!(snapshot.bytes_downloaded, 4096);
        assert_eq!(snapshot.skipped_pages, vec![2]);
        assert_eq!(snapshot.total_pages, 10);
    }

    #[test]
    fn test_skipped_pages_sorted_and_unique() {
        let tracker = ProgressTracker::new("job", 10);
        for page in [7, 3, 7, 5] {
            tracker.observe(event(page, PageState::FailedPermanent, 0));
        }
        assert_eq!(tracker.snapshot().skipped_pages, vec![3, 5, 7]);
    }

    #[test]
    fn test_pages_completed_monotonic_under_concurrency() {
        let tracker = ProgressTracker::new("job", 800);
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for i in 0..100 {
                        tracker.observe(event(worker * 100 + i + 1, PageState::Succeeded, 1));
                        let now = tracker.snapshot().pages_completed;
                        assert!(now >= last);
                        last = now;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.snapshot().pages_completed, 800);
    }

    #[test]
    fn test_published_snapshots_never_go_backwards() {
        let tracker = ProgressTracker::new("job", 800);
        let rx = tracker.subscribe();
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = tracker.clone();
                let rx = rx.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for i in 0..100 {
                        tracker.observe(event(worker * 100 + i + 1, PageState::Succeeded, 1));
                        let seen = rx.borrow().pages_completed;
                        assert!(seen >= last, "published {seen} after {last}");
                        last = seen;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(rx.borrow().pages_completed, 800);
    }

    #[test]
    fn test_assembly_skip_counts_failure_once() {
        let tracker = ProgressTracker::new("job", 4);
        let mut rx = tracker.subscribe();
        tracker.observe(event(1, PageState::Succeeded, 10));
        tracker.observe(event(2, PageState::Succeeded, 10));
        tracker.observe(event(3, PageState::FailedPermanent, 0));

        tracker.record_assembly_skip(2);
        tracker.record_assembly_skip(3);
        tracker.record_assembly_skip(2);

        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.pages_completed, 2);
        assert_eq!(snapshot.pages_failed, 2);
        assert_eq!(snapshot.skipped_pages, vec![2, 3]);
    }

    #[test]
    fn test_status_transitions() {
        let tracker = ProgressTracker::new("job", 1);
        assert!(tracker.pause().is_err());
        tracker.transition(JobStatus::Running).unwrap();
        tracker.pause().unwrap();
        assert!(tracker.is_paused());
        tracker.resume().unwrap();
        assert!(!tracker.is_paused());
        tracker.cancel().unwrap();
        assert!(tracker.is_cancelled());
        assert_eq!(tracker.cancel().unwrap(), JobStatus::Cancelled);
        assert!(tracker.resume().is_err());
    }

    #[tokio::test]
    async fn test_wait_until_dispatchable_blocks_while_paused() {
        let tracker = ProgressTracker::new("job", 1);
        tracker.transition(JobStatus::Running).unwrap();
        tracker.pause().unwrap();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_until_dispatchable().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        tracker.resume().unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiters() {
        let tracker = ProgressTracker::new("job", 1);
        tracker.transition(JobStatus::Running).unwrap();
        tracker.pause().unwrap();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_until_dispatchable().await })
        };
        tracker.cancel().unwrap();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let tracker = ProgressTracker::new("job", 2);
        let mut rx = tracker.subscribe();
        tracker.observe(event(1, PageState::Succeeded, 10));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().pages_completed, 1);
    }

    #[test]
    fn test_estimate_eta() {
        assert_eq!(estimate_eta(0, 0, Duration::ZERO), Some(0));
        assert_eq!(estimate_eta(10, 0, Duration::from_secs(5)), None);
        assert_eq!(estimate_eta(10, 5, Duration::from_secs(5)), Some(10));
    }
}
