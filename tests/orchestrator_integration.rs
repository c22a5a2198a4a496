//! End-to-end job runs through the orchestrator against a mock library server.

use std::time::Duration;

use lopdf::Document;
use manuscript_core::discovery::DiscoveredManuscript;
use manuscript_core::download::{HttpClient, RetryPolicy};
use manuscript_core::job::{JobStatus, ManuscriptJob};
use manuscript_core::orchestrator::{
    JobOutcome, JobSettings, ManuscriptJobOrchestrator, PartStatus,
};
use manuscript_core::pdf::AssemblerOptions;
use manuscript_core::plan::PartPlanner;
use manuscript_core::profile::LibraryProfile;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::pages::{jpeg_page, page_links};
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

const PAGE_BYTES: f64 = 1000.0;

fn settings(dir: &TempDir, threshold_bytes: u64) -> JobSettings {
    JobSettings {
        planner: PartPlanner::new(threshold_bytes),
        retry_policy: RetryPolicy::new(
            2,
            Duration::from_millis(10),
            Duration::from_millis(20),
            2.0,
        ),
        default_concurrency: 4,
        base_timeout: Duration::from_secs(120),
        request_timeout: Duration::from_secs(5),
        work_dir: dir.path().join("work"),
        output_dir: dir.path().join("out"),
        skip_existing: false,
        assembler: AssemblerOptions::default(),
    }
}

fn job(base: &str, pages: u32, profile: &LibraryProfile) -> ManuscriptJob {
    let manuscript = DiscoveredManuscript {
        display_name: "Codex 7".to_string(),
        total_pages: i64::from(pages),
        page_links: page_links(base, pages),
        estimated_bytes_per_page: Some(PAGE_BYTES),
        source_id: None,
    };
    ManuscriptJob::from_discovery("codex-7", manuscript, profile).unwrap()
}

async fn mount_pages(server: &wiremock::MockServer, delay: Duration) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/page/\d+\.jpg$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(jpeg_page(11))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_oversized_job_is_split_into_named_parts() {
    let server = require_mock_server!();
    mount_pages(&server, Duration::ZERO).await;

    let dir = TempDir::new().unwrap();
    let profile = LibraryProfile::neutral("default");
    // 9 pages x 1000 bytes over a 3000 byte threshold: 3 parts of 3 pages.
    let orchestrator = ManuscriptJobOrchestrator::new(
        job(&server.uri(), 9, &profile),
        profile,
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        settings(&dir, 3000),
    );
    let report = orchestrator.start().await.unwrap();

    assert_eq!(report.outcome, JobOutcome::FullSuccess);
    assert_eq!(report.parts.len(), 3);
    for (index, part) in report.parts.iter().enumerate() {
        let expected = dir
            .path()
            .join("out")
            .join(format!("Codex 7 (part {} of 3).pdf", index + 1));
        assert_eq!(part.output, expected);
        assert_eq!(
            part.status,
            PartStatus::Written {
                included: 3,
                skipped: 0
            }
        );
        let doc = Document::load(&expected).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.total_parts, 3);
    assert_eq!(snapshot.part_index, 3);
    assert_eq!(snapshot.pages_completed, 9);
    assert_eq!(snapshot.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_cancelled_job_resumes_from_staged_pages() {
    let server = require_mock_server!();
    mount_pages(&server, Duration::from_millis(60)).await;

    let dir = TempDir::new().unwrap();
    let profile = LibraryProfile {
        max_concurrent_downloads: Some(1),
        ..LibraryProfile::neutral("default")
    };

    let first = ManuscriptJobOrchestrator::new(
        job(&server.uri(), 6, &profile),
        profile.clone(),
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        settings(&dir, u64::MAX),
    );
    let mut updates = first.subscribe();
    let canceller = first.clone();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            if updates.borrow_and_update().pages_completed >= 2 {
                canceller.cancel().unwrap();
                break;
            }
        }
    });
    let report = first.start().await.unwrap();
    watcher.await.unwrap();

    assert_eq!(report.outcome, JobOutcome::Cancelled);
    assert_eq!(report.written_paths().count(), 0);
    assert!(!dir.path().join("out/Codex 7.pdf").exists());
    let fetched_first = server.received_requests().await.unwrap().len();
    assert!((2..6).contains(&fetched_first), "fetched {fetched_first}");

    let second = ManuscriptJobOrchestrator::new(
        job(&server.uri(), 6, &profile),
        profile,
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        settings(&dir, u64::MAX),
    );
    let report = second.start().await.unwrap();

    assert_eq!(report.outcome, JobOutcome::FullSuccess);
    assert!(dir.path().join("out/Codex 7.pdf").is_file());
    // Every page went over the wire exactly once across both runs.
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
    assert!(!dir.path().join("work/codex-7").exists());
}

#[tokio::test]
async fn test_pause_holds_dispatch_until_resume() {
    let server = require_mock_server!();
    mount_pages(&server, Duration::from_millis(40)).await;

    let dir = TempDir::new().unwrap();
    let profile = LibraryProfile {
        max_concurrent_downloads: Some(1),
        ..LibraryProfile::neutral("default")
    };
    let orchestrator = ManuscriptJobOrchestrator::new(
        job(&server.uri(), 5, &profile),
        profile,
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        settings(&dir, u64::MAX),
    );

    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.start().await })
    };

    let mut updates = orchestrator.subscribe();
    while updates.borrow_and_update().pages_completed < 1 {
        updates.changed().await.unwrap();
    }
    orchestrator.pause().unwrap();
    assert_eq!(orchestrator.status(), JobStatus::Paused);

    // At most the one in-flight page may finish while paused.
    let at_pause = orchestrator.snapshot().pages_completed;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(orchestrator.snapshot().pages_completed <= at_pause + 1);
    assert_eq!(orchestrator.status(), JobStatus::Paused);

    orchestrator.resume().unwrap();
    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.outcome, JobOutcome::FullSuccess);
    assert_eq!(orchestrator.snapshot().pages_completed, 5);
}

#[tokio::test]
async fn test_cancel_during_retry_backoff_writes_no_partial_pdf() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/page/2.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_pages(&server, Duration::ZERO).await;

    let dir = TempDir::new().unwrap();
    let profile = LibraryProfile::neutral("default");
    let mut slow_retry = settings(&dir, u64::MAX);
    slow_retry.retry_policy = RetryPolicy::new(
        3,
        Duration::from_millis(800),
        Duration::from_millis(800),
        2.0,
    );
    let orchestrator = ManuscriptJobOrchestrator::new(
        job(&server.uri(), 2, &profile),
        profile,
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        slow_retry,
    );

    let canceller = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            orchestrator.cancel().unwrap();
        })
    };
    let report = orchestrator.start().await.unwrap();
    canceller.await.unwrap();

    assert_eq!(report.outcome, JobOutcome::Cancelled);
    assert_eq!(report.parts[0].status, PartStatus::NotFinished);
    assert!(report.skipped_pages.is_empty());
    assert!(!dir.path().join("out/Codex 7.pdf").exists());
    // Page 1 stays staged for the next run.
    let staged = std::fs::read_dir(dir.path().join("work/codex-7")).unwrap().count();
    assert_eq!(staged, 1);
    assert!(orchestrator.snapshot().skipped_pages.is_empty());
}

