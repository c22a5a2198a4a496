//! Timeout scaling by manuscript size and source.

use std::time::Duration;

use crate::profile::LibraryProfile;

/// Multiplier applied to the base timeout according to the page count.
///
/// | Pages | Multiplier |
/// |-------|-----------|
/// | 1-200 | 1 |
/// | 201-300 | 2 |
/// | 301+ | 3 |
#[must_use]
pub fn page_count_multiplier(total_pages: u32) -> u32 {
    match total_pages {
        0..=200 => 1,
        201..=300 => 2,
        _ => 3,
    }
}

/// Page-count multiplier for a job of `profile`, honoring its floor for
/// large manuscripts.
#[must_use]
pub fn job_page_multiplier(total_pages: u32, profile: &LibraryProfile) -> u32 {
    let by_size = page_count_multiplier(total_pages);
    match profile.page_multiplier_floor {
        Some(floor) if total_pages > floor.above_pages => by_size.max(floor.multiplier),
        _ => by_size,
    }
}

/// Returns the download-phase deadline for a job.
///
/// `base × job_page_multiplier × profile.timeout_multiplier`. A non-positive
/// or non-finite library multiplier is treated as 1.
///
/// ```
/// use std::time::Duration;
/// use manuscript_core::download::timeout::effective_timeout;
/// use manuscript_core::profile::LibraryProfile;
///
/// // 842 pages from a ×1.5 library with a 15 minute base: 67.5 minutes.
/// let profile = LibraryProfile {
///     timeout_multiplier: 1.5,
///     ..LibraryProfile::neutral("graz")
/// };
/// let timeout = effective_timeout(Duration::from_secs(900), 842, &profile);
/// assert_eq!(timeout, Duration::from_secs(4050));
/// ```
#[must_use]
pub fn effective_timeout(base: Duration, total_pages: u32, profile: &LibraryProfile) -> Duration {
    let scaled = base * job_page_multiplier(total_pages, profile);
    scale(scaled, profile.timeout_multiplier)
}

/// Returns the timeout for a single page request.
#[must_use]
pub fn request_timeout(base: Duration, library_multiplier: f64) -> Duration {
    scale(base, library_multiplier)
}

fn scale(duration: Duration, multiplier: f64) -> Duration {
    if multiplier.is_finite() && multiplier > 0.0 {
        duration.mul_f64(multiplier)
    } else {
        duration
    }
}
