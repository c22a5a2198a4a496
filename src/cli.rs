//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use manuscript_core::config::CoreConfig;

/// Download a digitized manuscript and assemble it into PDFs.
///
/// Reads a page-discovery manifest (JSON with displayName, totalPages and
/// pageLinks), downloads every page with per-library pacing and retries, and
/// writes one PDF per part. Oversized manuscripts are split automatically.
///
/// Exit codes: 0 all pages saved, 1 saved with missing pages or cancelled,
/// 2 failed.
#[derive(Parser, Debug)]
#[command(name = "manuscript-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Discovery manifest path, or `-` to read it from stdin
    #[arg(value_name = "MANIFEST", default_value = "-")]
    pub manifest: String,

    /// Directory for the finished PDFs (default: current directory)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory for staged page images (default: user cache directory)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/manuscript-downloader/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Library source id; overrides the manifest's sourceId
    #[arg(short = 's', long, value_name = "ID")]
    pub source: Option<String>,

    /// Job id naming the staging directory; reuse it to resume an interrupted run
    #[arg(long, value_name = "ID")]
    pub job_id: Option<String>,

    /// Pages in flight when the library profile sets no limit (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Attempts per page including the first one (1-20)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=20))]
    pub max_retries: Option<u8>,

    /// Keep part PDFs that already exist instead of rebuilding them
    #[arg(long)]
    pub skip_existing: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Default log level. `RUST_LOG` still takes precedence.
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// Layers flags over the loaded configuration.
    pub fn apply_to(&self, config: &mut CoreConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = Some(dir.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.default_max_concurrent_downloads = usize::from(concurrency);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = u32::from(retries);
        }
        if self.skip_existing {
            config.skip_existing = true;
        }
    }
}
