//! Per-source tuning profiles.
//!
//! Document servers differ wildly in how fast they answer, how many parallel
//! requests they tolerate and how large their page images are. A
//! [`LibraryProfile`] captures those traits for one source, and the
//! [`LibraryProfileRegistry`] maps source identifiers to profiles with a typed
//! fallback for sources that have no dedicated entry.
//!
//! The registry is built once at process start (built-in table plus config
//! overrides) and is read-only afterwards.
//!
//! # Example
//!
//! ```
//! use manuscript_core::profile::LibraryProfileRegistry;
//!
//! let registry = LibraryProfileRegistry::builtin();
//! let profile = registry.get("internet_culturale");
//! assert_eq!(profile.max_concurrent_downloads, Some(4));
//!
//! // Unknown sources fall back to neutral defaults.
//! let fallback = registry.get("some_new_library");
//! assert!((fallback.timeout_multiplier - 1.0).abs() < f64::EPSILON);
//! ```

mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

/// Source identifier used when a job has no known source.
pub const FALLBACK_SOURCE_ID: &str = "default";

/// Retry backoff overrides for one source.
///
/// Unset fields inherit the global retry settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackoffPolicy {
    /// Attempts per page including the first one.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub base_delay: Option<Duration>,
    /// Upper bound for any single backoff delay.
    pub max_delay: Option<Duration>,
}

impl BackoffPolicy {
    /// Slower, longer-capped backoff for servers that need time to recover.
    #[must_use]
    pub const fn progressive() -> Self {
        Self {
            max_attempts: Some(5),
            base_delay: Some(Duration::from_secs(2)),
            max_delay: Some(Duration::from_secs(60)),
        }
    }
}

/// Lowest page-count timeout multiplier for large manuscripts of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMultiplierFloor {
    /// The floor applies to jobs with more pages than this.
    pub above_pages: u32,
    /// Minimum page-count multiplier for those jobs.
    pub multiplier: u32,
}

/// Tuning parameters for a single document source.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryProfile {
    /// Normalized source identifier.
    pub source_id: String,
    /// Factor applied to the base job timeout and to each request timeout.
    pub timeout_multiplier: f64,
    /// Library-specific split threshold; `None` or zero defers to the global one.
    pub auto_split_threshold_bytes: Option<u64>,
    /// Parallel page fetches allowed for this source.
    pub max_concurrent_downloads: Option<usize>,
    /// Retry behavior overrides.
    pub backoff: BackoffPolicy,
    /// Typical page image size, used when discovery gives no estimate.
    pub estimated_bytes_per_page: Option<u64>,
    /// Minimum spacing between two requests to the same host.
    pub min_request_interval: Duration,
    /// Raises the page-count timeout multiplier for large jobs.
    pub page_multiplier_floor: Option<PageMultiplierFloor>,
}

impl LibraryProfile {
    /// Creates a neutral profile for `source_id`.
    #[must_use]
    pub fn neutral(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            timeout_multiplier: 1.0,
            auto_split_threshold_bytes: None,
            max_concurrent_downloads: None,
            backoff: BackoffPolicy::default(),
            estimated_bytes_per_page: None,
            min_request_interval: Duration::ZERO,
            page_multiplier_floor: None,
        }
    }

    /// Returns the split threshold to use given the global one.
    ///
    /// A library threshold wins whenever it is set and non-zero, including
    /// when it is lower than the global value.
    #[must_use]
    pub fn split_threshold(&self, global_threshold_bytes: u64) -> u64 {
        match self.auto_split_threshold_bytes {
            Some(threshold) if threshold > 0 => threshold,
            _ => global_threshold_bytes,
        }
    }

    /// Returns the concurrency cap, falling back to `default`.
    #[must_use]
    pub fn concurrency(&self, default: usize) -> usize {
        self.max_concurrent_downloads
            .filter(|value| *value > 0)
            .unwrap_or(default)
            .max(1)
    }

    /// Returns the per-page size estimate, falling back to `default`.
    #[must_use]
    pub fn bytes_per_page(&self, default: u64) -> u64 {
        self.estimated_bytes_per_page.unwrap_or(default)
    }

    /// Applies a config override on top of this profile.
    fn apply(&mut self, overrides: &ProfileOverride) {
        if let Some(multiplier) = overrides.timeout_multiplier {
            self.timeout_multiplier = multiplier;
        }
        if let Some(threshold) = overrides.auto_split_threshold_bytes {
            self.auto_split_threshold_bytes = Some(threshold);
        }
        if let Some(concurrency) = overrides.max_concurrent_downloads {
            self.max_concurrent_downloads = Some(concurrency);
        }
        if let Some(bytes) = overrides.estimated_bytes_per_page {
            self.estimated_bytes_per_page = Some(bytes);
        }
        if let Some(ms) = overrides.min_request_interval_ms {
            self.min_request_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = overrides.max_attempts {
            self.backoff.max_attempts = Some(attempts);
        }
        if let Some(ms) = overrides.retry_base_delay_ms {
            self.backoff.base_delay = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = overrides.retry_max_delay_ms {
            self.backoff.max_delay = Some(Duration::from_millis(ms));
        }
    }
}

/// Config-file override for one source (`[profiles.<source_id>]`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileOverride {
    pub timeout_multiplier: Option<f64>,
    pub auto_split_threshold_bytes: Option<u64>,
    pub max_concurrent_downloads: Option<usize>,
    pub estimated_bytes_per_page: Option<u64>,
    pub min_request_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
}

impl ProfileOverride {
    /// Checks values that would make a profile unusable.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(multiplier) = self.timeout_multiplier
            && !(multiplier.is_finite() && multiplier > 0.0)
        {
            return Err(format!(
                "timeout_multiplier must be a positive number, got {multiplier}"
            ));
        }
        if let Some(concurrency) = self.max_concurrent_downloads
            && !(1..=32).contains(&concurrency)
        {
            return Err(format!(
                "max_concurrent_downloads must be in 1..=32, got {concurrency}"
            ));
        }
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Immutable map from source identifier to [`LibraryProfile`].
#[derive(Debug, Clone)]
pub struct LibraryProfileRegistry {
    profiles: HashMap<String, LibraryProfile>,
    fallback: LibraryProfile,
}

impl Default for LibraryProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LibraryProfileRegistry {
    /// Creates a registry from the built-in profile table.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_profiles(builtin::profiles())
    }

    /// Creates a registry from an explicit set of profiles.
    #[must_use]
    pub fn from_profiles(profiles: impl IntoIterator<Item = LibraryProfile>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|mut profile| {
                profile.source_id = normalize_source_id(&profile.source_id);
                (profile.source_id.clone(), profile)
            })
            .collect();
        Self {
            profiles,
            fallback: LibraryProfile::neutral(FALLBACK_SOURCE_ID),
        }
    }

    /// Built-in profiles with config overrides applied.
    ///
    /// An override for an unknown source creates a new profile starting from
    /// neutral values. An override keyed `default` adjusts the fallback.
    #[must_use]
    pub fn with_overrides(overrides: &BTreeMap<String, ProfileOverride>) -> Self {
        let mut registry = Self::builtin();
        for (source_id, profile_override) in overrides {
            let key = normalize_source_id(source_id);
            if key == FALLBACK_SOURCE_ID {
                registry.fallback.apply(profile_override);
                continue;
            }
            let profile = registry
                .profiles
                .entry(key.clone())
                .or_insert_with(|| LibraryProfile::neutral(key.clone()));
            profile.apply(profile_override);
            debug!(source_id = %key, "applied profile override");
        }
        registry
    }

    /// Looks up the profile for `source_id`, falling back to neutral defaults.
    #[must_use]
    pub fn get(&self, source_id: &str) -> &LibraryProfile {
        let key = normalize_source_id(source_id);
        match self.profiles.get(&key) {
            Some(profile) => profile,
            None => {
                if !key.is_empty() && key != FALLBACK_SOURCE_ID {
                    warn!(source_id = %key, "no library profile, using defaults");
                }
                &self.fallback
            }
        }
    }

    /// Returns whether a dedicated profile exists for `source_id`.
    #[must_use]
    pub fn contains(&self, source_id: &str) -> bool {
        self.profiles.contains_key(&normalize_source_id(source_id))
    }
}

/// Lowercases and maps `-`/`.`/spaces to `_` so `internet-culturale` and
/// `internet_culturale` resolve to the same profile.
#[must_use]
pub fn normalize_source_id(source_id: &str) -> String {
    source_id
        .trim()
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
