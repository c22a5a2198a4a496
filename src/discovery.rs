//! Page discovery contract.
//!
//! Discovery (scraping a library viewer or IIIF manifest for page URLs) is an
//! external collaborator. The core only consumes its result, which it treats
//! as untrusted: [`DiscoveredManuscript::validate`] runs before any job is
//! built.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Errors surfaced by discovery. A job never starts when one is raised.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery result is inconsistent.
    #[error("invalid discovery result: {reason}")]
    Invalid {
        /// What was wrong.
        reason: String,
    },

    /// The manifest could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Io {
        /// Manifest path (`-` for stdin).
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON for a discovery result.
    #[error("malformed manifest {path}: {source}")]
    Malformed {
        /// Manifest path (`-` for stdin).
        path: PathBuf,
        /// The parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The collaborator reported a failure of its own.
    #[error("discovery failed for {source_url}: {message}")]
    Source {
        /// The source that was being discovered.
        source_url: String,
        /// Collaborator message.
        message: String,
    },
}

impl DiscoveryError {
    /// Creates an invalid-result error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// What discovery found for one manuscript.
///
/// JSON field names follow the collaborator's camelCase wire format:
///
/// ```json
/// {"displayName": "Codex 12", "totalPages": 2,
///  "pageLinks": ["https://…/1.jpg", "https://…/2.jpg"],
///  "estimatedBytesPerPage": 819200, "sourceId": "graz"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredManuscript {
    /// Human-readable title.
    pub display_name: String,
    /// Reported page count. Signed because it comes from untrusted input.
    pub total_pages: i64,
    /// One URL per page, in page order.
    pub page_links: Vec<String>,
    /// Average page image size in bytes, if the collaborator knows it.
    #[serde(default)]
    pub estimated_bytes_per_page: Option<f64>,
    /// Library identifier, if the collaborator knows it.
    #[serde(default)]
    pub source_id: Option<String>,
}

impl DiscoveredManuscript {
    /// Checks the result before any job is built.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Invalid`] when the title is blank, the page
    /// count is not positive, the link count differs from the page count, or
    /// a link is blank.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.display_name.trim().is_empty() {
            return Err(DiscoveryError::invalid("display name is empty"));
        }
        if self.total_pages <= 0 {
            return Err(DiscoveryError::invalid(format!(
                "total pages must be positive, got {}",
                self.total_pages
            )));
        }
        let expected = usize::try_from(self.total_pages)
            .map_err(|_| DiscoveryError::invalid("total pages out of range"))?;
        if self.page_links.len() != expected {
            return Err(DiscoveryError::invalid(format!(
                "expected {expected} page links, got {}",
                self.page_links.len()
            )));
        }
        if let Some(index) = self.page_links.iter().position(|l| l.trim().is_empty()) {
            return Err(DiscoveryError::invalid(format!(
                "page link {} is empty",
                index + 1
            )));
        }
        Ok(())
    }

    /// Returns the per-page estimate in whole bytes when it is usable.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn bytes_per_page_estimate(&self) -> Option<u64> {
        self.estimated_bytes_per_page
            .filter(|value| value.is_finite() && *value >= 1.0)
            .map(|value| value.round() as u64)
    }
}

/// Finds the pages of a manuscript.
#[async_trait]
pub trait PageDiscovery: Send + Sync {
    /// Discovers the pages behind `source`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the source cannot be read or parsed.
    async fn discover_pages(&self, source: &str) -> Result<DiscoveredManuscript, DiscoveryError>;
}

/// Reads a discovery result previously written as a JSON manifest.
///
/// `source` is a file path, or `-` for stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestFileDiscovery;

#[async_trait]
impl PageDiscovery for ManifestFileDiscovery {
    #[instrument(skip(self))]
    async fn discover_pages(&self, source: &str) -> Result<DiscoveredManuscript, DiscoveryError> {
        let path = Path::new(source);
        let raw = if source == "-" {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .map_err(|e| DiscoveryError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            buffer
        } else {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| DiscoveryError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?
        };

        let manuscript: DiscoveredManuscript =
            serde_json::from_str(&raw).map_err(|e| DiscoveryError::Malformed {
                path: path.to_path_buf(),
                source: e,
            })?;
        manuscript.validate()?;
        debug!(
            pages = manuscript.total_pages,
            name = %manuscript.display_name,
            "manifest loaded"
        );
        Ok(manuscript)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> DiscoveredManuscript {
        DiscoveredManuscript {
            display_name: "Codex".to_string(),
            total_pages: 2,
            page_links: vec!["https://e.org/1".to_string(), "https://e.org/2".to_string()],
            estimated_bytes_per_page: None,
            source_id: None,
        }
    }

    #[test]
    fn test_validate_accepts_consistent_result() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_results() {
        let mut zero = valid();
        zero.total_pages = 0;
        zero.page_links.clear();
        assert!(zero.validate().is_err());

        let mut mismatch = valid();
        mismatch.total_pages = 3;
        let msg = mismatch.validate().unwrap_err().to_string();
        assert!(msg.contains("expected 3 page links, got 2"), "unexpected: {msg}");

        let mut blank = valid();
        blank.page_links[1] = "  ".to_string();
        assert!(blank.validate().is_err());

        let mut nameless = valid();
        nameless.display_name = String::new();
        assert!(nameless.validate().is_err());
    }

    #[test]
    fn test_bytes_per_page_estimate_filters_nonsense() {
        let mut m = valid();
        assert_eq!(m.bytes_per_page_estimate(), None);
        m.estimated_bytes_per_page = Some(f64::NAN);
        assert_eq!(m.bytes_per_page_estimate(), None);
        m.estimated_bytes_per_page = Some(-5.0);
        assert_eq!(m.bytes_per_page_estimate(), None);
        m.estimated_bytes_per_page = Some(1536.4);
        assert_eq!(m.bytes_per_page_estimate(), Some(1536));
    }

    #[tokio::test]
    async fn test_manifest_file_discovery_reads_camel_case_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(
            &path,
            r#"{"displayName":"Graz 1","totalPages":1,"pageLinks":["https://e.org/1.jpg"],"sourceId":"graz"}"#,
        )
        .unwrap();

        let manuscript = ManifestFileDiscovery
            .discover_pages(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(manuscript.display_name, "Graz 1");
        assert_eq!(manuscript.source_id.as_deref(), Some("graz"));
    }

    #[tokio::test]
    async fn test_manifest_file_discovery_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        let result = ManifestFileDiscovery
            .discover_pages(missing.to_str().unwrap())
            .await;
        assert!(matches!(result, Err(DiscoveryError::Io { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        let result = ManifestFileDiscovery
            .discover_pages(broken.to_str().unwrap())
            .await;
        assert!(matches!(result, Err(DiscoveryError::Malformed { .. })));
    }
}
