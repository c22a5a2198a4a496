//! Helpers shared by unit tests.

#![allow(clippy::unwrap_used)]

use std::io::Cursor;
use std::net::TcpListener;

use image::{ImageFormat, Rgb, RgbImage};
use wiremock::MockServer;

fn should_skip_socket_bound_test() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }
    eprintln!("[socket-bound-test] cannot bind localhost socket; skipping wiremock test");
    true
}

/// Starts a mock server, or returns `None` when sockets are unavailable.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if should_skip_socket_bound_test() {
        None
    } else {
        Some(MockServer::start().await)
    }
}

/// A noisy 96x128 RGB scan; noise keeps the encoded size well above 1 KiB.
pub fn page_image(seed: u32) -> RgbImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    RgbImage::from_fn(96, 128, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    })
}

/// JPEG-encoded [`page_image`].
pub fn jpeg_page_bytes(seed: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    page_image(seed)
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// PNG-encoded [`page_image`].
pub fn png_page_bytes(seed: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    page_image(seed)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
