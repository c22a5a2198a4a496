//! Page image and manuscript fixtures.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};

/// A noisy 80x120 RGB scan; noise keeps JPEG output above the 1 KiB floor.
pub fn page_image(seed: u32) -> RgbImage {
    let mut state = seed.wrapping_mul(2_654_435_761) | 1;
    RgbImage::from_fn(80, 120, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    })
}

pub fn jpeg_page(seed: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    page_image(seed)
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

pub fn png_page(seed: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    page_image(seed)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn page_links(base: &str, pages: u32) -> Vec<String> {
    (1..=pages).map(|p| format!("{base}/page/{p}.jpg")).collect()
}

/// Writes a discovery manifest and returns its path.
pub fn write_manifest(dir: &Path, display_name: &str, links: &[String]) -> PathBuf {
    let manifest = serde_json::json!({
        "displayName": display_name,
        "totalPages": links.len(),
        "pageLinks": links,
        "sourceId": "default",
    });
    let path = dir.join("manifest.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
    path
}
