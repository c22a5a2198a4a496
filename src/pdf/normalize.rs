//! Page image normalization: decode, bound dimensions, re-encode as JPEG.
//!
//! Runs on the blocking pool, one batch at a time, so only a batch worth of
//! raw images is ever decoded at once.

use image::ImageError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::warn;

use super::{ImageBuffer, PagePayload, SkippedPage};

/// Pages normalized per blocking batch.
pub const NORMALIZE_BATCH_SIZE: usize = 5;

/// Longest edge of a normalized page, in pixels.
pub const MAX_PAGE_DIMENSION: u32 = 2048;

/// JPEG quality of normalized pages.
pub const JPEG_QUALITY: u8 = 90;

/// Normalization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Longest edge after scaling.
    pub max_dimension: u32,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_dimension: MAX_PAGE_DIMENSION,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// A page ready to be placed in the PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPage {
    /// 1-based page number.
    pub page_number: u32,
    /// Pixel width of `jpeg`.
    pub width: u32,
    /// Pixel height of `jpeg`.
    pub height: u32,
    /// Baseline RGB JPEG data.
    pub jpeg: Vec<u8>,
}

/// Result of normalizing one page of a batch.
#[derive(Debug)]
pub(crate) enum Normalized {
    Page(NormalizedPage),
    Skipped(SkippedPage),
}

/// Decodes `bytes`, scales it to fit `max_dimension` and re-encodes it.
///
/// # Errors
///
/// Returns the decoder or encoder error.
pub fn normalize_image(
    page_number: u32,
    bytes: &[u8],
    options: NormalizeOptions,
) -> Result<NormalizedPage, ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let bound = options.max_dimension.max(1);
    let scaled = if decoded.width() > bound || decoded.height() > bound {
        decoded.resize(bound, bound, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = scaled.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, options.jpeg_quality.clamp(1, 100))
        .encode_image(&rgb)?;

    Ok(NormalizedPage {
        page_number,
        width: rgb.width(),
        height: rgb.height(),
        jpeg,
    })
}

/// Normalizes a batch in page order. Blocking: reads staged files and decodes.
///
/// Pages that cannot be read or decoded become skips instead of failing the
/// batch.
pub(crate) fn normalize_batch(
    batch: Vec<ImageBuffer>,
    options: NormalizeOptions,
) -> Vec<Normalized> {
    batch
        .into_iter()
        .map(|image| {
            let page_number = image.page_number;
            let bytes = match image.payload {
                PagePayload::Skipped { reason } => {
                    return Normalized::Skipped(SkippedPage {
                        page_number,
                        reason,
                    });
                }
                PagePayload::InMemory(bytes) => bytes,
                PagePayload::Staged(path) => match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(
                            page_number,
                            path = %path.display(),
                            error = %e,
                            "staged page unreadable"
                        );
                        return Normalized::Skipped(SkippedPage {
                            page_number,
                            reason: format!("staged page unreadable: {e}"),
                        });
                    }
                },
            };
            match normalize_image(page_number, &bytes, options) {
                Ok(page) => Normalized::Page(page),
                Err(e) => {
                    warn!(page_number, error = %e, "page image could not be decoded");
                    Normalized::Skipped(SkippedPage {
                        page_number,
                        reason: format!("image decode failed: {e}"),
                    })
                }
            }
        })
        .collect()
}
