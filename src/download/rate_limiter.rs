//! Per-host request spacing and server-mandated cooldowns.
//!
//! Pages of one manuscript almost always live on a single image server, so
//! the throttle is keyed by host. Two rules apply before each request:
//!
//! - consecutive requests to a host are at least the library's
//!   `min_request_interval` apart;
//! - after a 429 with `Retry-After`, no worker touches that host until the
//!   cooldown has elapsed (not only the worker that got the 429).
//!
//! Different hosts never wait on each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Shared per-host throttle. Wrap in `Arc` and hand to every worker.
#[derive(Debug)]
pub struct HostThrottle {
    interval: Duration,
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug, Default)]
struct HostTiming {
    last_request: Option<Instant>,
    not_before: Option<Instant>,
}

#[derive(Debug, Default)]
struct HostState {
    timing: Mutex<HostTiming>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl HostThrottle {
    /// Creates a throttle enforcing `interval` between requests to one host.
    ///
    /// A zero interval only enforces server cooldowns.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            hosts: DashMap::new(),
        }
    }

    /// Returns the configured spacing.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn state(&self, host: &str) -> Arc<HostState> {
        // Clone the Arc so the shard lock is released before any await.
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::default()))
            .clone()
    }

    /// Waits until a request to `url`'s host is allowed, then claims the slot.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        let host = extract_domain(url);
        tracing::Span::current().record("host", host.as_str());
        let state = self.state(&host);

        let mut timing = state.timing.lock().await;
        let now = Instant::now();

        let mut ready_at = now;
        if let Some(last) = timing.last_request
            && !self.interval.is_zero()
        {
            ready_at = ready_at.max(last + self.interval);
        }
        if let Some(not_before) = timing.not_before {
            ready_at = ready_at.max(not_before);
        }

        if ready_at > now {
            let delay = ready_at - now;
            let cumulative = state.add_cumulative_delay(delay);
            debug!(
                host = %host,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "throttling request"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    host = %host,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive throttling on this host"
                );
            }
            tokio::time::sleep_until(ready_at).await;
        }

        timing.last_request = Some(Instant::now());
    }

    /// Blocks `url`'s host for `delay` (from a Retry-After header).
    #[instrument(skip(self), fields(host))]
    pub async fn record_cooldown(&self, url: &str, delay: Duration) {
        let host = extract_domain(url);
        tracing::Span::current().record("host", host.as_str());
        let state = self.state(&host);

        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        let mut timing = state.timing.lock().await;
        timing.not_before = Some(timing.not_before.map_or(until, |current| current.max(until)));
        debug!(host = %host, delay_ms = delay.as_millis(), "recorded server cooldown");
    }
}

/// Extracts the lowercased host from a URL, or `"unknown"` when it has none.
///
/// ```
/// use manuscript_core::download::rate_limiter::extract_domain;
///
/// assert_eq!(extract_domain("https://IIIF.Example.org/page/1.jpg"), "iiif.example.org");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header (integer seconds or HTTP-date).
///
/// Negative or unparseable values yield `None`; past dates yield zero; values
/// above ten minutes are capped.
///
/// ```
/// use std::time::Duration;
/// use manuscript_core::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(when) => Some(
            when.duration_since(std::time::SystemTime::now())
                .unwrap_or(Duration::ZERO)
                .min(MAX_RETRY_AFTER),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
