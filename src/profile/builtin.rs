//! Built-in profile table for sources with known server behavior.

use std::time::Duration;

use super::{BackoffPolicy, LibraryProfile, PageMultiplierFloor};

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

/// Returns the built-in profiles.
pub(super) fn profiles() -> Vec<LibraryProfile> {
    vec![
        LibraryProfile {
            max_concurrent_downloads: Some(4),
            timeout_multiplier: 1.5,
            auto_split_threshold_bytes: Some(400 * MIB),
            backoff: BackoffPolicy::progressive(),
            estimated_bytes_per_page: Some(800 * KIB),
            ..LibraryProfile::neutral("internet_culturale")
        },
        LibraryProfile {
            timeout_multiplier: 1.5,
            estimated_bytes_per_page: Some(700 * KIB),
            page_multiplier_floor: Some(PageMultiplierFloor {
                above_pages: 100,
                multiplier: 3,
            }),
            ..LibraryProfile::neutral("manuscripta")
        },
        LibraryProfile {
            max_concurrent_downloads: Some(3),
            timeout_multiplier: 2.0,
            backoff: BackoffPolicy::progressive(),
            estimated_bytes_per_page: Some(800 * KIB),
            ..LibraryProfile::neutral("graz")
        },
        LibraryProfile {
            max_concurrent_downloads: Some(3),
            timeout_multiplier: 1.5,
            backoff: BackoffPolicy::progressive(),
            ..LibraryProfile::neutral("verona")
        },
        LibraryProfile {
            max_concurrent_downloads: Some(3),
            estimated_bytes_per_page: Some(300 * KIB),
            min_request_interval: Duration::from_millis(250),
            ..LibraryProfile::neutral("rome")
        },
        LibraryProfile {
            max_concurrent_downloads: Some(2),
            timeout_multiplier: 2.0,
            estimated_bytes_per_page: Some(5 * MIB),
            ..LibraryProfile::neutral("morgan")
        },
        LibraryProfile {
            max_concurrent_downloads: Some(4),
            estimated_bytes_per_page: Some(500 * KIB),
            ..LibraryProfile::neutral("bdl")
        },
        LibraryProfile {
            estimated_bytes_per_page: Some(600 * KIB),
            ..LibraryProfile::neutral("orleans")
        },
        LibraryProfile {
            estimated_bytes_per_page: Some(500 * KIB),
            ..LibraryProfile::neutral("cologne")
        },
        LibraryProfile {
            estimated_bytes_per_page: Some(1200 * KIB),
            ..LibraryProfile::neutral("nypl")
        },
        LibraryProfile {
            estimated_bytes_per_page: Some(500 * KIB),
            ..LibraryProfile::neutral("czech")
        },
        LibraryProfile {
            estimated_bytes_per_page: Some(400 * KIB),
            ..LibraryProfile::neutral("modena")
        },
        LibraryProfile {
            estimated_bytes_per_page: Some(400 * KIB),
            ..LibraryProfile::neutral("florus")
        },
    ]
}
