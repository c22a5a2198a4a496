//! Output file naming and atomic PDF writes.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::debug;

/// Sanitizes a display name or identifier for use as a single path segment.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with `_`. Names that would
/// still resolve to `.`/`..` get their dots replaced.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Output file name for one part.
///
/// `"{name} (part N of M).pdf"` when the job was split, else `"{name}.pdf"`.
/// `part_number` is 1-based.
#[must_use]
pub fn part_filename(display_name: &str, part_number: usize, total_parts: usize) -> String {
    let name = sanitize_filename(display_name);
    if total_parts > 1 {
        format!("{name} (part {part_number} of {total_parts}).pdf")
    } else {
        format!("{name}.pdf")
    }
}

/// Writes `bytes` to `path` through a sibling temp file and a rename, so a
/// crash never leaves a truncated PDF under the final name.
///
/// # Errors
///
/// Returns the IO error of the write or rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let temp = temp_path(path);
    if let Err(e) = fs::write(&temp, bytes).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    debug!(path = %path.display(), bytes = bytes.len(), "output written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
