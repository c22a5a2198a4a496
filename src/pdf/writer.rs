//! Incremental PDF construction with lopdf.
//!
//! Pages are buffered and moved into the document every
//! [`RELEASE_EVERY_PAGES`] pages, after which the staging buffer is released.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

use super::normalize::NormalizedPage;

/// Pages buffered before they are written into the document.
pub const RELEASE_EVERY_PAGES: usize = 3;

/// A4 width in points.
pub const PAGE_WIDTH_PT: f32 = 595.0;

/// A4 height in points.
pub const PAGE_HEIGHT_PT: f32 = 842.0;

/// Blank border around each image, in points.
pub const PAGE_MARGIN_PT: f32 = 20.0;

/// Where an image lands on the page: `(x, y, width, height)` in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Scales a `width` x `height` pixel image to fit inside the page margins,
/// preserving aspect ratio, and centers it.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn fit_to_page(width: u32, height: u32) -> Placement {
    let avail_w = PAGE_WIDTH_PT - 2.0 * PAGE_MARGIN_PT;
    let avail_h = PAGE_HEIGHT_PT - 2.0 * PAGE_MARGIN_PT;
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let scale = (avail_w / w).min(avail_h / h);
    let (draw_w, draw_h) = (w * scale, h * scale);
    Placement {
        x: (PAGE_WIDTH_PT - draw_w) / 2.0,
        y: (PAGE_HEIGHT_PT - draw_h) / 2.0,
        width: draw_w,
        height: draw_h,
    }
}

/// Builds one PDF, a page at a time.
pub(crate) struct PdfPageWriter {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
    pending: Vec<NormalizedPage>,
    release_every: usize,
}

impl PdfPageWriter {
    pub(crate) fn new(release_every: usize) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            pending: Vec::new(),
            release_every: release_every.max(1),
        }
    }

    /// Pages written or pending.
    pub(crate) fn page_count(&self) -> usize {
        self.kids.len() + self.pending.len()
    }

    pub(crate) fn push(&mut self, page: NormalizedPage) -> Result<(), lopdf::Error> {
        self.pending.push(page);
        if self.pending.len() >= self.release_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), lopdf::Error> {
        for page in std::mem::take(&mut self.pending) {
            self.add_page(page)?;
        }
        self.pending.shrink_to_fit();
        Ok(())
    }

    fn add_page(&mut self, page: NormalizedPage) -> Result<(), lopdf::Error> {
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(page.width),
                "Height" => i64::from(page.height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.jpeg,
        );
        let image_id = self.doc.add_object(image);

        let at = fit_to_page(page.width, page.height);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(at.width),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(at.height),
                        Object::Real(at.x),
                        Object::Real(at.y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH_PT.into(), PAGE_HEIGHT_PT.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    /// Writes the page tree and catalog and serializes the document.
    pub(crate) fn finish(mut self) -> Result<Vec<u8>, lopdf::Error> {
        self.flush()?;
        let count = i64::try_from(self.kids.len()).unwrap_or(i64::MAX);
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pdf::normalize::{NormalizeOptions, normalize_image};
    use crate::test_support::jpeg_page_bytes;

    fn page(n: u32) -> NormalizedPage {
        normalize_image(n, &jpeg_page_bytes(n), NormalizeOptions::default()).unwrap()
    }

    #[test]
    fn test_fit_to_page_centers_and_preserves_ratio() {
        let tall = fit_to_page(1000, 2000);
        assert!((tall.height - (PAGE_HEIGHT_PT - 2.0 * PAGE_MARGIN_PT)).abs() < 0.01);
        assert!((tall.width * 2.0 - tall.height).abs() < 0.01);
        assert!((tall.x * 2.0 + tall.width - PAGE_WIDTH_PT).abs() < 0.01);

        let wide = fit_to_page(2000, 500);
        assert!((wide.width - (PAGE_WIDTH_PT - 2.0 * PAGE_MARGIN_PT)).abs() < 0.01);
        assert!((wide.y * 2.0 + wide.height - PAGE_HEIGHT_PT).abs() < 0.01);
    }

    #[test]
    fn test_writer_releases_pending_pages_in_batches() {
        let mut writer = PdfPageWriter::new(RELEASE_EVERY_PAGES);
        writer.push(page(1)).unwrap();
        writer.push(page(2)).unwrap();
        assert_eq!(writer.pending.len(), 2);
        writer.push(page(3)).unwrap();
        assert!(writer.pending.is_empty());
        assert_eq!(writer.kids.len(), 3);
        writer.push(page(4)).unwrap();
        assert_eq!(writer.page_count(), 4);
    }

    #[test]
    fn test_finish_produces_loadable_pdf() {
        let mut writer = PdfPageWriter::new(2);
        for n in 1..=5 {
            writer.push(page(n)).unwrap();
        }
        let bytes = writer.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 5);
    }
}
