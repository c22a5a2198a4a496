//! On-disk staging area for fetched page images.
//!
//! Layout: `{work_dir}/{job_id}/page_NNNNN.img`. Pages already staged by an
//! earlier, interrupted run are picked up instead of being fetched again.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::constants::MIN_VALID_IMAGE_SIZE_BYTES;
use crate::output::sanitize_filename;
use crate::plan::PageRange;

/// Per-job page staging directory.
#[derive(Debug, Clone)]
pub struct PageStore {
    dir: PathBuf,
}

impl PageStore {
    /// Opens (creating if needed) the staging directory for `job_id`.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the directory cannot be created.
    #[instrument(skip(work_dir), fields(work_dir = %work_dir.display()))]
    pub async fn open(work_dir: &Path, job_id: &str) -> io::Result<Self> {
        let dir = work_dir.join(sanitize_filename(job_id));
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "page store ready");
        Ok(Self { dir })
    }

    /// Returns the staging directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the staging path of a 1-based page.
    #[must_use]
    pub fn page_path(&self, page_number: u32) -> PathBuf {
        self.dir.join(format!("page_{page_number:05}.img"))
    }

    /// Returns the size of a previously staged page, if it is usable.
    pub async fn staged_size(&self, page_number: u32) -> Option<u64> {
        let meta = tokio::fs::metadata(self.page_path(page_number)).await.ok()?;
        (meta.is_file() && meta.len() >= MIN_VALID_IMAGE_SIZE_BYTES).then_some(meta.len())
    }

    /// Deletes the staged pages of `range`. Missing files are ignored.
    pub async fn remove_pages(&self, range: PageRange) {
        for page in range.pages() {
            let path = self.page_path(page);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != io::ErrorKind::NotFound
            {
                debug!(path = %path.display(), error = %e, "failed to remove staged page");
            }
        }
    }

    /// Deletes the whole staging directory.
    ///
    /// # Errors
    ///
    /// Returns the IO error unless the directory is already gone.
    pub async fn remove_all(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
