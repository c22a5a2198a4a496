//! Per-job coordination: plan, then fetch and assemble each part in turn.
//!
//! One [`ManuscriptJobOrchestrator`] drives one [`ManuscriptJob`]. Parts run
//! strictly one after another; within a part the fetch pool downloads pages
//! concurrently while the assembler consumes them as they land, so a part's
//! PDF is being built while its later pages are still in flight.
//!
//! Control commands (`pause`, `resume`, `cancel`) go through the job's
//! [`ProgressTracker`] and may be issued from any task through a clone of the
//! orchestrator.

mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

pub use error::JobError;

use crate::config::CoreConfig;
use crate::download::{
    FetchOptions, FetchWorkerPool, HttpClient, PageSink, PageState, PageStore, PageTask,
    RetryPolicy, effective_timeout,
};
use crate::job::{InvalidTransition, JobStatus, ManuscriptJob};
use crate::output::{part_filename, write_atomic};
use crate::pdf::{AssembledPart, AssemblerOptions, ImageBuffer, PdfAssembler, SkippedPage};
use crate::plan::{DownloadPart, PageRange, PartPlanner};
use crate::profile::LibraryProfile;
use crate::progress::{ProgressSnapshot, ProgressTracker};

/// Everything a job needs besides the job itself.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Planner carrying the global split threshold.
    pub planner: PartPlanner,
    /// Global retry policy; library backoff is layered on top.
    pub retry_policy: RetryPolicy,
    /// Concurrency when the profile sets none.
    pub default_concurrency: usize,
    /// Base download-phase budget.
    pub base_timeout: Duration,
    /// Base per-request timeout.
    pub request_timeout: Duration,
    /// Page staging root.
    pub work_dir: PathBuf,
    /// Where PDFs are written.
    pub output_dir: PathBuf,
    /// Keep existing part PDFs instead of rebuilding them.
    pub skip_existing: bool,
    /// PDF assembly tunables.
    pub assembler: AssemblerOptions,
}

impl JobSettings {
    /// Derives settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            planner: config.planner(),
            retry_policy: config.retry_policy(),
            default_concurrency: config.default_max_concurrent_downloads,
            base_timeout: config.base_timeout(),
            request_timeout: config.request_timeout(),
            work_dir: config.resolved_work_dir(),
            output_dir: config.resolved_output_dir(),
            skip_existing: config.skip_existing,
            assembler: AssemblerOptions::default(),
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every part written with every page.
    FullSuccess,
    /// Every part written, some pages missing.
    CompletedWithSkips,
    /// Stopped by the user; finished parts remain valid.
    Cancelled,
    /// At least one part produced no PDF.
    Failed,
}

impl JobOutcome {
    /// Status the job ends in.
    #[must_use]
    pub fn status(self) -> JobStatus {
        match self {
            Self::FullSuccess | Self::CompletedWithSkips => JobStatus::Completed,
            Self::Cancelled => JobStatus::Cancelled,
            Self::Failed => JobStatus::Failed,
        }
    }
}

/// What happened to one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartStatus {
    /// The PDF was written.
    Written {
        /// Pages in the PDF.
        included: usize,
        /// Pages left out.
        skipped: usize,
    },
    /// The PDF already existed and was kept.
    Existing,
    /// No PDF could be produced.
    Failed {
        /// Why.
        reason: String,
    },
    /// The job was cancelled before the part finished.
    NotFinished,
}

/// Per-part entry of a [`JobReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReport {
    /// 1-based part number.
    pub part_number: usize,
    /// Pages of the part.
    pub range: PageRange,
    /// Output PDF path.
    pub output: PathBuf,
    /// Result of the part.
    pub status: PartStatus,
}

/// Final account of a job run.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Job identifier.
    pub job_id: String,
    /// Overall result.
    pub outcome: JobOutcome,
    /// Planned parts in order; parts never reached are absent.
    pub parts: Vec<PartReport>,
    /// Every page left out of a written PDF, in page order.
    pub skipped_pages: Vec<SkippedPage>,
}

impl JobReport {
    /// Output paths of parts that have a PDF on disk.
    pub fn written_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.parts
            .iter()
            .filter(|p| matches!(p.status, PartStatus::Written { .. } | PartStatus::Existing))
            .map(|p| &p.output)
    }
}

struct Inner {
    job: ManuscriptJob,
    profile: LibraryProfile,
    client: HttpClient,
    settings: JobSettings,
    tracker: ProgressTracker,
}

/// Top-level coordinator for one manuscript job.
///
/// Cloning is cheap and yields another handle to the same job, so a UI or a
/// signal handler can pause or cancel while `start` runs.
#[derive(Clone)]
pub struct ManuscriptJobOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ManuscriptJobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManuscriptJobOrchestrator")
            .field("job_id", &self.inner.job.id)
            .field("source_id", &self.inner.profile.source_id)
            .field("status", &self.inner.tracker.status())
            .finish_non_exhaustive()
    }
}

impl ManuscriptJobOrchestrator {
    /// Creates an orchestrator for a queued job.
    #[must_use]
    pub fn new(
        job: ManuscriptJob,
        profile: LibraryProfile,
        client: HttpClient,
        settings: JobSettings,
    ) -> Self {
        let tracker = ProgressTracker::new(job.id.clone(), job.total_pages);
        Self {
            inner: Arc::new(Inner {
                job,
                profile,
                client,
                settings,
                tracker,
            }),
        }
    }

    /// The job being driven.
    #[must_use]
    pub fn job(&self) -> &ManuscriptJob {
        &self.inner.job
    }

    /// The job's progress tracker.
    #[must_use]
    pub fn tracker(&self) -> &ProgressTracker {
        &self.inner.tracker
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.inner.tracker.status()
    }

    /// Current progress.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.tracker.snapshot()
    }

    /// Pushes a snapshot on every progress change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.tracker.subscribe()
    }

    /// Stops dispatching pages; in-flight fetches finish.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the job is running.
    pub fn pause(&self) -> Result<JobStatus, InvalidTransition> {
        self.inner.tracker.pause()
    }

    /// Restarts dispatch after a pause.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the job is paused.
    pub fn resume(&self) -> Result<JobStatus, InvalidTransition> {
        self.inner.tracker.resume()
    }

    /// Cancels the job. Written parts stay; staged pages are kept for a
    /// later run.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the job already completed or failed.
    pub fn cancel(&self) -> Result<JobStatus, InvalidTransition> {
        self.inner.tracker.cancel()
    }

    /// Runs the job to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] when planning fails, the page store cannot be
    /// prepared, or the job was already started. Part failures are reported
    /// in the [`JobReport`] and end the job as failed without an error.
    #[instrument(
        skip(self),
        fields(job_id = %self.inner.job.id, pages = self.inner.job.total_pages)
    )]
    pub async fn start(&self) -> Result<JobReport, JobError> {
        let inner = &*self.inner;
        let job = &inner.job;
        let tracker = &inner.tracker;

        if tracker.is_cancelled() {
            info!("job cancelled before start");
            return Ok(self.report(JobOutcome::Cancelled, Vec::new(), Vec::new()));
        }
        tracker
            .transition(JobStatus::Running)
            .map_err(JobError::InvalidTransition)?;

        let parts = match inner.settings.planner.plan_parts(
            job.total_pages,
            job.estimated_total_bytes,
            &inner.profile,
            &job.page_links,
        ) {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "planning failed");
                self.finish(JobStatus::Failed)?;
                return Err(JobError::planning(&job.id, e));
            }
        };
        tracker.set_total_parts(parts.len());
        info!(
            parts = parts.len(),
            estimated_bytes = job.estimated_total_bytes,
            source_id = %inner.profile.source_id,
            "job planned"
        );

        let store = match PageStore::open(&inner.settings.work_dir, &job.id).await {
            Ok(store) => store,
            Err(e) => {
                self.finish(JobStatus::Failed)?;
                return Err(JobError::store(&inner.settings.work_dir, e));
            }
        };
        let pool = match self.build_pool(store.clone()) {
            Ok(pool) => pool,
            Err(e) => {
                self.finish(JobStatus::Failed)?;
                return Err(e);
            }
        };

        let mut reports = Vec::with_capacity(parts.len());
        let mut skipped_pages = Vec::new();
        for part in &parts {
            if !tracker.wait_until_dispatchable().await {
                break;
            }
            tracker.begin_part(part.number());
            let output = inner.settings.output_dir.join(part_filename(
                &job.display_name,
                part.number(),
                part.total_parts,
            ));

            if inner.settings.skip_existing
                && tokio::fs::try_exists(&output).await.unwrap_or(false)
            {
                info!(part = part.number(), path = %output.display(), "part PDF exists, skipping");
                tracker.credit_pages(u32::try_from(part.page_count()).unwrap_or(u32::MAX), 0);
                store.remove_pages(part.range).await;
                reports.push(PartReport {
                    part_number: part.number(),
                    range: part.range,
                    output,
                    status: PartStatus::Existing,
                });
                continue;
            }

            let status = match self.run_part(&pool, &store, part).await {
                PartRun::Assembled(assembled) => {
                    self.write_part(&store, part, &output, assembled, &mut skipped_pages)
                        .await
                }
                PartRun::Failed(reason) => PartStatus::Failed { reason },
                PartRun::Cancelled => PartStatus::NotFinished,
            };
            let stop = matches!(status, PartStatus::NotFinished);
            reports.push(PartReport {
                part_number: part.number(),
                range: part.range,
                output,
                status,
            });
            if stop {
                break;
            }
        }

        // A pause issued after the last dispatch still has to be lifted
        // before the job can complete.
        let outcome = if !tracker.wait_until_dispatchable().await {
            JobOutcome::Cancelled
        } else if reports.len() < parts.len()
            || reports
                .iter()
                .any(|r| matches!(r.status, PartStatus::Failed { .. }))
        {
            JobOutcome::Failed
        } else if skipped_pages.is_empty() {
            JobOutcome::FullSuccess
        } else {
            JobOutcome::CompletedWithSkips
        };

        let outcome = match self.finish(outcome.status())? {
            JobStatus::Cancelled => JobOutcome::Cancelled,
            _ => outcome,
        };
        if outcome == JobOutcome::FullSuccess
            && let Err(e) = store.remove_all().await
        {
            warn!(path = %store.dir().display(), error = %e, "failed to clean page store");
        }

        info!(
            outcome = ?outcome,
            parts = reports.len(),
            skipped = skipped_pages.len(),
            "job finished"
        );
        Ok(self.report(outcome, reports, skipped_pages))
    }

    fn build_pool(&self, store: PageStore) -> Result<FetchWorkerPool, JobError> {
        let inner = &*self.inner;
        let budget = effective_timeout(
            inner.settings.base_timeout,
            inner.job.total_pages,
            &inner.profile,
        );
        debug!(budget_secs = budget.as_secs(), "download budget");
        let options = FetchOptions::for_profile(
            &inner.profile,
            &inner.settings.retry_policy,
            inner.settings.default_concurrency,
            inner.settings.request_timeout,
        )
        .with_download_budget(budget);
        FetchWorkerPool::new(inner.client.clone(), store, inner.tracker.clone(), options)
            .map_err(|source| JobError::Pool { source })
    }

    /// Fetches one part while its assembler consumes pages as they land.
    async fn run_part(
        &self,
        pool: &FetchWorkerPool,
        store: &PageStore,
        part: &DownloadPart,
    ) -> PartRun {
        let (tx, rx) = mpsc::unbounded_channel();
        let assembler = PdfAssembler::new(self.inner.settings.assembler);
        let (part_index, range) = (part.part_index, part.range);
        let assembly =
            tokio::spawn(async move { assembler.assemble(part_index, rx, range).await });

        let sink = page_sink(self.inner.tracker.clone(), store.clone(), tx);
        let fetched = pool.download(part, sink).await;

        match fetched {
            Ok(summary) if summary.cancelled || self.inner.tracker.is_cancelled() => {
                info!(part = part.number(), "part cancelled, staged pages kept");
                assembly.abort();
                return PartRun::Cancelled;
            }
            Ok(summary) => debug!(
                part = part.number(),
                failed = summary.failed.len(),
                "part fetched"
            ),
            Err(e) => {
                assembly.abort();
                return PartRun::Failed(e.to_string());
            }
        }

        match assembly.await {
            Ok(Ok(assembled)) => PartRun::Assembled(assembled),
            Ok(Err(e)) => {
                error!(part = part.number(), error = %e, "part assembly failed");
                PartRun::Failed(e.to_string())
            }
            Err(e) => {
                error!(part = part.number(), error = %e, "assembler task failed");
                PartRun::Failed(format!("assembler task failed: {e}"))
            }
        }
    }

    async fn write_part(
        &self,
        store: &PageStore,
        part: &DownloadPart,
        output: &Path,
        assembled: AssembledPart,
        skipped_pages: &mut Vec<SkippedPage>,
    ) -> PartStatus {
        for skipped in &assembled.skipped_pages {
            self.inner.tracker.record_assembly_skip(skipped.page_number);
        }
        if let Err(e) = write_atomic(output, &assembled.pdf_bytes).await {
            error!(
                part = part.number(),
                path = %output.display(),
                error = %e,
                "failed to write PDF"
            );
            return PartStatus::Failed {
                reason: format!("failed to write {}: {e}", output.display()),
            };
        }
        info!(
            part = part.number(),
            path = %output.display(),
            included = assembled.included_pages.len(),
            skipped = assembled.skipped_pages.len(),
            "part written"
        );
        store.remove_pages(part.range).await;

        let status = PartStatus::Written {
            included: assembled.included_pages.len(),
            skipped: assembled.skipped_pages.len(),
        };
        skipped_pages.extend(assembled.skipped_pages);
        status
    }

    /// Moves to a terminal status. A cancel that raced ahead wins.
    fn finish(&self, status: JobStatus) -> Result<JobStatus, JobError> {
        let tracker = &self.inner.tracker;
        match tracker.transition(status) {
            Ok(status) => Ok(status),
            Err(_) if tracker.is_cancelled() => Ok(JobStatus::Cancelled),
            Err(e) => Err(JobError::InvalidTransition(e)),
        }
    }

    fn report(
        &self,
        outcome: JobOutcome,
        parts: Vec<PartReport>,
        skipped_pages: Vec<SkippedPage>,
    ) -> JobReport {
        JobReport {
            job_id: self.inner.job.id.clone(),
            outcome,
            parts,
            skipped_pages,
        }
    }
}

enum PartRun {
    Assembled(AssembledPart),
    Failed(String),
    Cancelled,
}

/// Forwards page transitions to the tracker and finished pages to the
/// assembler.
fn page_sink(
    tracker: ProgressTracker,
    store: PageStore,
    tx: mpsc::UnboundedSender<ImageBuffer>,
) -> PageSink {
    Arc::new(move |task: &PageTask| {
        tracker.observe(task.into());
        let image = match task.state {
            PageState::Succeeded => {
                ImageBuffer::staged(task.page_number, store.page_path(task.page_number))
            }
            PageState::FailedPermanent => ImageBuffer::skipped(
                task.page_number,
                task.error.clone().unwrap_or_else(|| "page failed".to_string()),
            ),
            PageState::Pending | PageState::Downloading | PageState::FailedRetryable => return,
        };
        // The assembler may already have stopped with an error.
        let _ = tx.send(image);
    })
}
