//! HTTP client wrapper for fetching page images.
//!
//! Bodies are streamed straight to the page store so a 5 MiB scan never sits
//! in memory twice. A page only lands at its final path once it has passed the
//! size and signature checks; anything else is removed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{IMAGE_SNIFF_BYTES, MIN_VALID_IMAGE_SIZE_BYTES, USER_AGENT};
use super::error::PageFetchError;

/// HTTP client shared by all page workers of a job.
///
/// Create it once; the underlying connection pool is reused across pages.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client with the given connect timeout.
    ///
    /// Request timeouts are applied per call, since they depend on the library.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialize.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Fetches `url` into `dest`, returning the number of bytes stored.
    ///
    /// # Errors
    ///
    /// - [`PageFetchError::InvalidUrl`] for unparseable or non-http(s) URLs
    /// - [`PageFetchError::Timeout`] / [`PageFetchError::Network`] for transport failures
    /// - [`PageFetchError::HttpStatus`] for non-2xx responses
    /// - [`PageFetchError::MalformedImage`] when the body is too small or not an image
    /// - [`PageFetchError::Store`] when the staging file cannot be written
    #[instrument(skip(self, dest), fields(url = %url))]
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u64, PageFetchError> {
        let parsed = Url::parse(url).map_err(|_| PageFetchError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PageFetchError::invalid_url(url));
        }

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(PageFetchError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let partial = partial_path(dest);
        let outcome = stream_to_file(response, url, &partial).await;
        let (bytes, head) = match outcome {
            Ok(result) => result,
            Err(error) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(error);
            }
        };

        if let Err(error) = validate_image(url, bytes, &head) {
            debug!(path = %partial.display(), "discarding invalid page body");
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(error);
        }

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| PageFetchError::store(dest, e))?;

        debug!(bytes, path = %dest.display(), "page stored");
        Ok(bytes)
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> PageFetchError {
    if error.is_timeout() {
        PageFetchError::timeout(url)
    } else {
        PageFetchError::network(url, error)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Streams the body to `path`, returning the size and the first bytes.
async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<(u64, Vec<u8>), PageFetchError> {
    let file = File::create(path)
        .await
        .map_err(|e| PageFetchError::store(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut head = Vec::with_capacity(IMAGE_SNIFF_BYTES);
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(url, e))?;
        if head.len() < IMAGE_SNIFF_BYTES {
            let take = (IMAGE_SNIFF_BYTES - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| PageFetchError::store(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| PageFetchError::store(path, e))?;

    Ok((bytes_written, head))
}

/// Rejects bodies that cannot be a page image.
fn validate_image(url: &str, size: u64, head: &[u8]) -> Result<(), PageFetchError> {
    if size < MIN_VALID_IMAGE_SIZE_BYTES {
        return Err(PageFetchError::malformed(
            url,
            format!("body is {size} bytes, below the {MIN_VALID_IMAGE_SIZE_BYTES} byte minimum"),
        ));
    }
    if image::guess_format(head).is_err() {
        return Err(PageFetchError::malformed(url, "body is not a recognized image format"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::{jpeg_page_bytes, start_mock_server_or_skip};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_to_file_stores_valid_image() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        let body = jpeg_page_bytes(1);
        Mock::given(method("GET"))
            .and(path("/page/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dest = dir.path().join("page_00001.img");
        let url = format!("{}/page/1.jpg", server.uri());
        let bytes = client()
            .fetch_to_file(&url, &dest, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(bytes, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_fetch_to_file_404_is_http_status() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dest = dir.path().join("page_00002.img");
        let url = format!("{}/missing.jpg", server.uri());
        let result = client()
            .fetch_to_file(&url, &dest, Duration::from_secs(5))
            .await;

        match result {
            Err(PageFetchError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected HttpStatus, got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_to_file_captures_retry_after() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let url = format!("{}/busy.jpg", server.uri());
        let error = client()
            .fetch_to_file(&url, &dir.path().join("p.img"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(error.retry_after(), Some("3"));
    }

    #[tokio::test]
    async fn test_fetch_to_file_rejects_html_error_page() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        let html = format!("<html><body>{}</body></html>", "maintenance ".repeat(200));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let dest = dir.path().join("page_00003.img");
        let url = format!("{}/page/3.jpg", server.uri());
        let result = client()
            .fetch_to_file(&url, &dest, Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(PageFetchError::MalformedImage { .. })));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_fetch_to_file_times_out() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(jpeg_page_bytes(4))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let url = format!("{}/slow.jpg", server.uri());
        let result = client()
            .fetch_to_file(&url, &dir.path().join("p.img"), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(PageFetchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_fetch_to_file_rejects_non_http_scheme() {
        let dir = TempDir::new().unwrap();
        let result = client()
            .fetch_to_file(
                "ftp://example.org/p.jpg",
                &dir.path().join("p.img"),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(PageFetchError::InvalidUrl { .. })));
    }

    #[test]
    fn test_validate_image_thresholds() {
        let jpeg = jpeg_page_bytes(5);
        assert!(validate_image("u", jpeg.len() as u64, &jpeg[..IMAGE_SNIFF_BYTES]).is_ok());
        assert!(validate_image("u", 100, &jpeg[..IMAGE_SNIFF_BYTES]).is_err());
        assert!(validate_image("u", 4096, b"%PDF-1.4 not an image").is_err());
    }
}
