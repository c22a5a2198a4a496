//! Reorder buffer turning out-of-order page arrivals into page order.

use std::collections::BTreeMap;

use tracing::debug;

use super::{ImageBuffer, PagePayload};
use crate::plan::PageRange;

/// Holds early arrivals until every lower page of the range has been released.
#[derive(Debug)]
pub(crate) struct ReorderBuffer {
    next: u32,
    end: u32,
    pending: BTreeMap<u32, PagePayload>,
}

impl ReorderBuffer {
    pub(crate) fn new(range: PageRange) -> Self {
        Self {
            next: range.start_page,
            end: range.end_page,
            pending: BTreeMap::new(),
        }
    }

    /// Buffers an arrival. Pages outside the range, already released or
    /// already buffered are dropped and `false` is returned.
    pub(crate) fn insert(&mut self, image: ImageBuffer) -> bool {
        let page = image.page_number;
        if page < self.next || page > self.end || self.pending.contains_key(&page) {
            debug!(page, next = self.next, "ignoring unexpected page arrival");
            return false;
        }
        self.pending.insert(page, image.payload);
        true
    }

    /// Releases the next page in order, if it has arrived.
    pub(crate) fn pop_ready(&mut self) -> Option<ImageBuffer> {
        let payload = self.pending.remove(&self.next)?;
        let image = ImageBuffer {
            page_number: self.next,
            payload,
        };
        self.next += 1;
        Some(image)
    }

    /// Releases every remaining page in order. Pages that never arrived come
    /// back as skipped.
    pub(crate) fn drain_remaining(&mut self) -> Vec<ImageBuffer> {
        let mut out = Vec::new();
        while self.next <= self.end {
            let payload = self
                .pending
                .remove(&self.next)
                .unwrap_or_else(|| PagePayload::skipped("page was never delivered"));
            out.push(ImageBuffer {
                page_number: self.next,
                payload,
            });
            self.next += 1;
        }
        out
    }

    /// True once the whole range has been released.
    pub(crate) fn is_finished(&self) -> bool {
        self.next > self.end
    }

    /// Number of early arrivals waiting.
    pub(crate) fn buffered(&self) -> usize {
        self.pending.len()
    }
}
