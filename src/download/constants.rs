//! Constants for the download module (timeouts, validation, rate limiting).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a single page request (30 seconds) before library scaling.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default base timeout for a whole job's download phase (15 minutes).
pub const BASE_JOB_TIMEOUT_SECS: u64 = 900;

/// Bodies smaller than this are error pages or placeholders, not page images.
pub const MIN_VALID_IMAGE_SIZE_BYTES: u64 = 1024;

/// Leading bytes kept from a response to sniff the image format.
pub const IMAGE_SNIFF_BYTES: usize = 64;

/// Warning threshold for cumulative throttling delay per host (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum honored Retry-After value (10 minutes).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// User-Agent sent with every page request.
pub const USER_AGENT: &str = concat!("manuscript-downloader/", env!("CARGO_PKG_VERSION"));
