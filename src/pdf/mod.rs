//! Streaming PDF assembly.
//!
//! Page images arrive in completion order over a channel. A reorder buffer
//! releases them in page order; released pages are normalized in blocking
//! batches of [`NORMALIZE_BATCH_SIZE`] and handed through a bounded channel to
//! a single sequential PDF writer. At most one batch is being normalized and
//! one is queued for the writer, so memory stays bounded regardless of part
//! size.
//!
//! ```text
//! mpsc<ImageBuffer> ─► ReorderBuffer ─► normalize (blocking, ×5) ─► mpsc(1) ─► PdfPageWriter
//! ```

mod error;
mod normalize;
mod reorder;
mod writer;

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

pub use error::AssemblyError;
pub use normalize::{
    JPEG_QUALITY, MAX_PAGE_DIMENSION, NORMALIZE_BATCH_SIZE, NormalizeOptions, NormalizedPage,
    normalize_image,
};
pub use writer::{PAGE_HEIGHT_PT, PAGE_MARGIN_PT, PAGE_WIDTH_PT, RELEASE_EVERY_PAGES};

use normalize::{Normalized, normalize_batch};
use reorder::ReorderBuffer;
use writer::PdfPageWriter;

use crate::plan::PageRange;

/// Where a page's image data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePayload {
    /// Staged in the page store.
    Staged(PathBuf),
    /// Already in memory.
    InMemory(Vec<u8>),
    /// The page failed permanently and becomes a gap.
    Skipped {
        /// Why the page is missing.
        reason: String,
    },
}

impl PagePayload {
    /// Creates a skipped payload.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// True for [`PagePayload::Skipped`].
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// One page handed to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    /// 1-based page number within the manuscript.
    pub page_number: u32,
    /// The image, or why there is none.
    pub payload: PagePayload,
}

impl ImageBuffer {
    /// A page staged on disk.
    pub fn staged(page_number: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            page_number,
            payload: PagePayload::Staged(path.into()),
        }
    }

    /// A page held in memory.
    #[must_use]
    pub fn in_memory(page_number: u32, bytes: Vec<u8>) -> Self {
        Self {
            page_number,
            payload: PagePayload::InMemory(bytes),
        }
    }

    /// A page that will be recorded as a gap.
    pub fn skipped(page_number: u32, reason: impl Into<String>) -> Self {
        Self {
            page_number,
            payload: PagePayload::skipped(reason),
        }
    }
}

/// A page left out of the PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedPage {
    /// 1-based page number.
    pub page_number: u32,
    /// Why it is missing.
    pub reason: String,
}

/// The PDF for one part plus what went into it.
#[derive(Debug, Clone)]
pub struct AssembledPart {
    /// 0-based part index.
    pub part_index: usize,
    /// Serialized PDF document.
    pub pdf_bytes: Vec<u8>,
    /// Page numbers included, in document order.
    pub included_pages: Vec<u32>,
    /// Pages recorded as gaps, in page order.
    pub skipped_pages: Vec<SkippedPage>,
}

/// Tunables for [`PdfAssembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerOptions {
    /// Pages normalized per blocking batch.
    pub batch_size: usize,
    /// Pages buffered by the writer before release.
    pub release_every: usize,
    /// Image normalization settings.
    pub normalize: NormalizeOptions,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            batch_size: NORMALIZE_BATCH_SIZE,
            release_every: RELEASE_EVERY_PAGES,
            normalize: NormalizeOptions::default(),
        }
    }
}

#[derive(Debug, Default)]
struct WriterOutput {
    pdf_bytes: Vec<u8>,
    included_pages: Vec<u32>,
    skipped_pages: Vec<SkippedPage>,
}

/// Builds one PDF per part from a stream of page images.
#[derive(Debug, Clone, Default)]
pub struct PdfAssembler {
    options: AssemblerOptions,
}

impl PdfAssembler {
    /// Creates an assembler with explicit options.
    #[must_use]
    pub fn new(options: AssemblerOptions) -> Self {
        Self { options }
    }

    /// Assembles the pages of `range` into a PDF.
    ///
    /// Consumes `images` until the channel closes or every page of the range
    /// has been released. Pages never delivered are recorded as skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::NoUsablePages`] when nothing could be
    /// included, or a PDF/stage error when writing fails.
    #[instrument(
        skip(self, images),
        fields(part = part_index + 1, start = range.start_page, end = range.end_page)
    )]
    pub async fn assemble(
        &self,
        part_index: usize,
        mut images: mpsc::UnboundedReceiver<ImageBuffer>,
        range: PageRange,
    ) -> Result<AssembledPart, AssemblyError> {
        let part_number = part_index + 1;
        let batch_size = self.options.batch_size.max(1);
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<Normalized>>(1);
        let release_every = self.options.release_every;
        let writer =
            tokio::task::spawn_blocking(move || write_pages(part_number, release_every, batch_rx));

        let mut reorder = ReorderBuffer::new(range);
        let mut batch = Vec::with_capacity(batch_size);
        let mut writer_alive = true;

        'receive: while let Some(image) = images.recv().await {
            reorder.insert(image);
            while let Some(ready) = reorder.pop_ready() {
                batch.push(ready);
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if !self.normalize_and_send(part_number, full, &batch_tx).await? {
                        writer_alive = false;
                        break 'receive;
                    }
                }
            }
            if reorder.is_finished() {
                break;
            }
        }

        if writer_alive {
            let remaining = reorder.drain_remaining();
            if !remaining.is_empty() {
                debug!(count = remaining.len(), "draining undelivered pages");
            }
            batch.extend(remaining);
            while !batch.is_empty() {
                let tail = batch.split_off(batch.len().min(batch_size));
                let head = std::mem::replace(&mut batch, tail);
                if !self.normalize_and_send(part_number, head, &batch_tx).await? {
                    break;
                }
            }
        }
        drop(batch_tx);

        let output = writer
            .await
            .map_err(|e| AssemblyError::stage(part_number, e))??;

        info!(
            included = output.included_pages.len(),
            skipped = output.skipped_pages.len(),
            bytes = output.pdf_bytes.len(),
            "part assembled"
        );
        Ok(AssembledPart {
            part_index,
            pdf_bytes: output.pdf_bytes,
            included_pages: output.included_pages,
            skipped_pages: output.skipped_pages,
        })
    }

    /// Normalizes a batch on the blocking pool and queues it for the writer.
    /// Returns `false` when the writer has already stopped.
    async fn normalize_and_send(
        &self,
        part_number: usize,
        batch: Vec<ImageBuffer>,
        tx: &mpsc::Sender<Vec<Normalized>>,
    ) -> Result<bool, AssemblyError> {
        let options = self.options.normalize;
        let normalized = tokio::task::spawn_blocking(move || normalize_batch(batch, options))
            .await
            .map_err(|e| AssemblyError::stage(part_number, e))?;
        if tx.send(normalized).await.is_err() {
            warn!(part = part_number, "PDF writer stopped early");
            return Ok(false);
        }
        Ok(true)
    }
}

/// Blocking writer loop: appends pages in arrival order until the channel closes.
fn write_pages(
    part_number: usize,
    release_every: usize,
    mut batches: mpsc::Receiver<Vec<Normalized>>,
) -> Result<WriterOutput, AssemblyError> {
    let mut writer = PdfPageWriter::new(release_every);
    let mut output = WriterOutput::default();

    while let Some(batch) = batches.blocking_recv() {
        for item in batch {
            match item {
                Normalized::Page(page) => {
                    output.included_pages.push(page.page_number);
                    writer
                        .push(page)
                        .map_err(|e| AssemblyError::pdf(part_number, e))?;
                }
                Normalized::Skipped(skipped) => output.skipped_pages.push(skipped),
            }
        }
    }

    if writer.page_count() == 0 {
        return Err(AssemblyError::NoUsablePages {
            part_number,
            skipped: output.skipped_pages.len(),
        });
    }
    output.pdf_bytes = writer
        .finish()
        .map_err(|e| AssemblyError::pdf(part_number, e))?;
    Ok(output)
}
