//! Runtime configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/manuscript-downloader/config.toml`
//! (falling back to `$HOME/.config/...`) or an explicit path, validated, and
//! then overridden by CLI flags. Every key is optional:
//!
//! ```toml
//! global_auto_split_threshold_bytes = 838860800
//! base_timeout_secs = 900
//! max_retries = 3
//! default_max_concurrent_downloads = 4
//!
//! [profiles.graz]
//! max_concurrent_downloads = 2
//! timeout_multiplier = 2.5
//! ```

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::download::constants::{BASE_JOB_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use crate::download::{
    DEFAULT_BASE_DELAY, DEFAULT_CONCURRENCY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy,
};
use crate::plan::PartPlanner;
use crate::profile::{LibraryProfileRegistry, ProfileOverride};

/// Directory name used under the XDG config and cache roots.
pub const APP_DIR_NAME: &str = "manuscript-downloader";

/// Default global auto-split threshold (800 MiB).
pub const DEFAULT_AUTO_SPLIT_THRESHOLD_BYTES: u64 = 800 * 1024 * 1024;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`CoreConfig`].
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        /// Offending key.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Core settings shared by every job of a run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Split threshold used when a library profile has none.
    pub global_auto_split_threshold_bytes: u64,
    /// Base download-phase budget before page-count and library scaling.
    pub base_timeout_secs: u64,
    /// Base timeout of one page request.
    pub request_timeout_secs: u64,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Attempts per page including the first one.
    pub max_retries: u32,
    /// Pages in flight when a profile sets no limit.
    pub default_max_concurrent_downloads: usize,
    /// First retry delay.
    pub retry_base_delay_ms: u64,
    /// Retry delay cap.
    pub retry_max_delay_ms: u64,
    /// Page staging root; defaults to the user cache directory.
    pub work_dir: Option<PathBuf>,
    /// Where PDFs are written; defaults to the current directory.
    pub output_dir: Option<PathBuf>,
    /// Leave already-written part PDFs alone instead of rebuilding them.
    pub skip_existing: bool,
    /// Per-source profile overrides, keyed by source id.
    pub profiles: BTreeMap<String, ProfileOverride>,
}

impl Default for CoreConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            global_auto_split_threshold_bytes: DEFAULT_AUTO_SPLIT_THRESHOLD_BYTES,
            base_timeout_secs: BASE_JOB_TIMEOUT_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            default_max_concurrent_downloads: DEFAULT_CONCURRENCY,
            retry_base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            retry_max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            work_dir: None,
            output_dir: None,
            skip_existing: false,
            profiles: BTreeMap::new(),
        }
    }
}

impl CoreConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, malformed or out
    /// of range.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_toml_str(&raw, path)?;
        info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Loads `explicit` when given, else the default config file when it
    /// exists, else built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a file exists but cannot be used. A
    /// missing explicit path is an error; a missing default file is not.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match resolve_default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            other => {
                debug!(path = ?other, "no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_auto_split_threshold_bytes == 0 {
            return Err(ConfigError::invalid(
                "global_auto_split_threshold_bytes",
                "must be greater than zero",
            ));
        }
        validate_range("base_timeout_secs", self.base_timeout_secs, 1..=86_400)?;
        validate_range("request_timeout_secs", self.request_timeout_secs, 1..=3600)?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1..=3600)?;
        validate_range("max_retries", u64::from(self.max_retries), 1..=20)?;
        validate_range(
            "default_max_concurrent_downloads",
            self.default_max_concurrent_downloads as u64,
            1..=32,
        )?;
        validate_range("retry_base_delay_ms", self.retry_base_delay_ms, 0..=600_000)?;
        validate_range("retry_max_delay_ms", self.retry_max_delay_ms, 0..=3_600_000)?;

        for (source_id, profile) in &self.profiles {
            profile
                .validate()
                .map_err(|message| ConfigError::invalid(format!("profiles.{source_id}"), message))?;
        }
        Ok(())
    }

    /// Builds the immutable profile registry: built-ins plus overrides.
    #[must_use]
    pub fn registry(&self) -> LibraryProfileRegistry {
        LibraryProfileRegistry::with_overrides(&self.profiles)
    }

    /// Global retry policy before library backoff overrides.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            2.0,
        )
    }

    /// Planner carrying the global split threshold.
    #[must_use]
    pub fn planner(&self) -> PartPlanner {
        PartPlanner::new(self.global_auto_split_threshold_bytes)
    }

    /// Base download-phase budget.
    #[must_use]
    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs(self.base_timeout_secs)
    }

    /// Base page request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Page staging root.
    #[must_use]
    pub fn resolved_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(default_work_dir)
    }

    /// Output directory for PDFs.
    #[must_use]
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

fn validate_range(
    field: &str,
    value: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!(
                "{value}. Expected range: {}..={}",
                range.start(),
                range.end()
            ),
        ))
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/manuscript-downloader/config.toml`
/// 2. `$HOME/.config/manuscript-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(env_var_non_empty_os("XDG_CONFIG_HOME"), env_var_non_empty_os("HOME"))
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(xdg) = xdg_config_home {
        return Some(PathBuf::from(xdg).join(APP_DIR_NAME).join("config.toml"));
    }
    Some(
        PathBuf::from(home?)
            .join(".config")
            .join(APP_DIR_NAME)
            .join("config.toml"),
    )
}

/// `$XDG_CACHE_HOME/manuscript-downloader`, then `$HOME/.cache/...`, then the
/// system temp directory.
#[must_use]
pub fn default_work_dir() -> PathBuf {
    cache_dir_from(env_var_non_empty_os("XDG_CACHE_HOME"), env_var_non_empty_os("HOME"))
}

fn cache_dir_from(xdg_cache_home: Option<OsString>, home: Option<OsString>) -> PathBuf {
    if let Some(xdg) = xdg_cache_home {
        return PathBuf::from(xdg).join(APP_DIR_NAME);
    }
    match home {
        Some(home) => PathBuf::from(home).join(".cache").join(APP_DIR_NAME),
        None => env::temp_dir().join(APP_DIR_NAME),
    }
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
