//! CLI entry point for the manuscript downloader.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use manuscript_core::{
    CoreConfig, HttpClient, JobOutcome, JobReport, JobSettings, ManifestFileDiscovery,
    ManuscriptJob, ManuscriptJobOrchestrator, PageDiscovery, profile::FALLBACK_SOURCE_ID,
};
use tracing::{debug, info, warn};

mod cli;
mod terminal;

use cli::Args;

/// Process outcome mapped to exit codes 0, 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    Partial,
    Failure,
}

impl From<JobOutcome> for ProcessExit {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::FullSuccess => Self::Success,
            JobOutcome::CompletedWithSkips | JobOutcome::Cancelled => Self::Partial,
            JobOutcome::Failed => Self::Failure,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(1),
            ProcessExit::Failure => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    terminal::init_tracing(args.default_log_level());
    debug!(?args, "CLI arguments parsed");

    match run(&args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("error: {e:#}");
            ProcessExit::Failure.into()
        }
    }
}

async fn run(args: &Args) -> Result<ProcessExit> {
    let mut config = CoreConfig::load_or_default(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let manuscript = ManifestFileDiscovery
        .discover_pages(&args.manifest)
        .await
        .context("page discovery failed")?;

    let registry = config.registry();
    let source_id = args
        .source
        .clone()
        .or_else(|| manuscript.source_id.clone())
        .unwrap_or_else(|| FALLBACK_SOURCE_ID.to_string());
    let profile = registry.get(&source_id).clone();

    let job_id = args
        .job_id
        .clone()
        .unwrap_or_else(|| default_job_id(&profile.source_id, &manuscript.display_name));
    let job = ManuscriptJob::from_discovery(job_id, manuscript, &profile)?;
    info!(
        job_id = %job.id,
        name = %job.display_name,
        pages = job.total_pages,
        source_id = %profile.source_id,
        "starting manuscript download"
    );

    let client = HttpClient::new(config.connect_timeout()).context("failed to build HTTP client")?;
    let orchestrator =
        ManuscriptJobOrchestrator::new(job, profile, client, JobSettings::from_config(&config));

    let interrupt = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling; staged pages are kept for the next run");
            let _ = interrupt.cancel();
        }
    });

    let progress = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    )
    .then(|| terminal::spawn_progress_bar(orchestrator.subscribe()));

    let report = orchestrator.start().await;
    if let Some(handle) = progress {
        let _ = handle.await;
    }
    let report = report?;

    if !args.quiet {
        print_summary(&report);
    }
    Ok(report.outcome.into())
}

/// Stable id so rerunning the same manifest resumes from staged pages.
fn default_job_id(source_id: &str, display_name: &str) -> String {
    let name: String = display_name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{source_id}-{name}")
}

fn print_summary(report: &JobReport) {
    for path in report.written_paths() {
        println!("Saved {}", path.display());
    }
    if !report.skipped_pages.is_empty() {
        let pages: Vec<String> = report
            .skipped_pages
            .iter()
            .map(|page| page.page_number.to_string())
            .collect();
        println!("Missing pages: {}", pages.join(", "));
    }
    let label = match report.outcome {
        JobOutcome::FullSuccess => "complete",
        JobOutcome::CompletedWithSkips => "complete with missing pages",
        JobOutcome::Cancelled => "cancelled",
        JobOutcome::Failed => "failed",
    };
    println!("Job {}: {label}", report.job_id);
}
