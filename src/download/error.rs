//! Error types for page fetching.
//!
//! Every variant carries the page URL (or staging path) so a failed page can be
//! reported without the caller threading extra context through.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching a single page image.
#[derive(Debug, Error)]
pub enum PageFetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The page URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the per-request timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The page URL.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The page URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The page URL is malformed or not http(s).
    #[error("invalid page URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The response body is not a usable page image.
    #[error("malformed image from {url}: {reason}")]
    MalformedImage {
        /// The page URL.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// Writing the page into the page store failed.
    #[error("IO error staging page at {path}: {source}")]
    Store {
        /// The staging path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The job's download deadline passed before this page could be fetched.
    #[error("download deadline exceeded before fetching {url}")]
    DeadlineExceeded {
        /// The page URL.
        url: String,
    },
}

impl PageFetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a malformed image error.
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedImage {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a page store error.
    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }

    /// Creates a deadline error.
    pub fn deadline(url: impl Into<String>) -> Self {
        Self::DeadlineExceeded { url: url.into() }
    }

    /// Returns the Retry-After header value carried by an HTTP error, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

// No From<reqwest::Error> / From<io::Error>: every variant needs the URL or path,
// which the source errors do not carry. Use the constructors above.
