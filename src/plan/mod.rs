//! Splitting oversized manuscripts into contiguous page-range parts.
//!
//! Planning is a pure computation: given the page count, an estimated total
//! size and the effective split threshold, it produces page ranges that cover
//! `1..=total_pages` exactly once. Each range is then turned into a
//! [`DownloadPart`] carrying its own pre-sliced page links, which is the only
//! input the fetch stage receives for that part.
//!
//! # Example
//!
//! ```
//! use manuscript_core::plan::{PageRange, plan_with_parts};
//!
//! let ranges = plan_with_parts(247, 3).unwrap();
//! assert_eq!(
//!     ranges,
//!     vec![PageRange::new(1, 83), PageRange::new(84, 166), PageRange::new(167, 247)]
//! );
//! ```

mod error;

use std::fmt;
use std::ops::RangeInclusive;

use tracing::{debug, instrument};

pub use error::PlanningError;

use crate::profile::LibraryProfile;

/// Inclusive, 1-based page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRange {
    /// First page of the range (1-based).
    pub start_page: u32,
    /// Last page of the range, inclusive.
    pub end_page: u32,
}

impl PageRange {
    /// Creates a range; `start_page` must not exceed `end_page`.
    #[must_use]
    pub const fn new(start_page: u32, end_page: u32) -> Self {
        Self {
            start_page,
            end_page,
        }
    }

    /// Number of pages in the range.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.end_page - self.start_page + 1) as usize
    }

    /// Ranges are never empty; provided for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns whether `page` falls inside the range.
    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        (self.start_page..=self.end_page).contains(&page)
    }

    /// Iterates the page numbers of the range in ascending order.
    #[must_use]
    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start_page..=self.end_page
    }

    /// Slices a 0-based list of per-page items down to this range.
    ///
    /// `[start_page, end_page]` (1-based, inclusive) maps to
    /// `items[start_page - 1 .. end_page]`.
    #[must_use]
    pub fn slice<'a, T>(&self, items: &'a [T]) -> Option<&'a [T]> {
        let start = (self.start_page as usize).checked_sub(1)?;
        items.get(start..self.end_page as usize)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_page, self.end_page)
    }
}

/// One part of a manuscript job, ready to hand to the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPart {
    /// 0-based index of the part within the job.
    pub part_index: usize,
    /// Total number of parts in the job.
    pub total_parts: usize,
    /// Pages covered by this part.
    pub range: PageRange,
    /// Links for exactly the pages in `range`, in page order.
    pub page_links: Vec<String>,
}

impl DownloadPart {
    /// First page number of the part.
    #[must_use]
    pub fn start_page(&self) -> u32 {
        self.range.start_page
    }

    /// Last page number of the part.
    #[must_use]
    pub fn end_page(&self) -> u32 {
        self.range.end_page
    }

    /// Number of pages in the part.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_links.len()
    }

    /// Pairs each page number with its link.
    pub fn pages(&self) -> impl Iterator<Item = (u32, &str)> {
        self.range
            .pages()
            .zip(self.page_links.iter().map(String::as_str))
    }

    /// 1-based part number, as shown to users.
    #[must_use]
    pub fn number(&self) -> usize {
        self.part_index + 1
    }
}

/// Number of parts needed for `estimated_total_bytes` under `threshold_bytes`.
///
/// Returns 1 when the estimate fits (or is unknown, i.e. zero).
#[must_use]
pub fn number_of_parts(estimated_total_bytes: u64, threshold_bytes: u64) -> u64 {
    if threshold_bytes == 0 || estimated_total_bytes <= threshold_bytes {
        return 1;
    }
    estimated_total_bytes.div_ceil(threshold_bytes)
}

/// Splits `1..=total_pages` into at most `number_of_parts` contiguous ranges.
///
/// Every part gets `ceil(total_pages / number_of_parts)` pages except the last,
/// which absorbs the remainder. Parts that would start past the final page are
/// not produced, so fewer ranges than requested can come back when
/// `number_of_parts` approaches `total_pages`.
///
/// # Errors
///
/// Returns [`PlanningError::InvalidPageCount`] for `total_pages == 0` and
/// [`PlanningError::InvalidPartCount`] for `number_of_parts == 0`.
#[allow(clippy::cast_possible_truncation)]
pub fn plan_with_parts(
    total_pages: u32,
    number_of_parts: u64,
) -> Result<Vec<PageRange>, PlanningError> {
    if total_pages == 0 {
        return Err(PlanningError::InvalidPageCount { total_pages: 0 });
    }
    if number_of_parts == 0 {
        return Err(PlanningError::InvalidPartCount);
    }

    let total = u64::from(total_pages);
    let parts = number_of_parts.min(total);
    let pages_per_part = total.div_ceil(parts);

    let mut ranges = Vec::with_capacity(usize::try_from(parts).unwrap_or(1));
    for index in 0..parts {
        let start = index * pages_per_part + 1;
        if start > total {
            break;
        }
        let end = ((index + 1) * pages_per_part).min(total);
        // both bounded by total_pages, which is a u32
        ranges.push(PageRange::new(start as u32, end as u32));
    }
    Ok(ranges)
}

/// Plans the page ranges for a manuscript.
///
/// The effective threshold is the profile's own threshold when set and
/// non-zero, otherwise `global_threshold_bytes`.
///
/// # Errors
///
/// Returns [`PlanningError`] for a zero page count or when no threshold at all
/// is configured.
#[instrument(level = "debug", skip(profile), fields(source_id = %profile.source_id))]
pub fn plan(
    total_pages: u32,
    estimated_total_bytes: u64,
    profile: &LibraryProfile,
    global_threshold_bytes: u64,
) -> Result<Vec<PageRange>, PlanningError> {
    if total_pages == 0 {
        return Err(PlanningError::InvalidPageCount { total_pages: 0 });
    }
    let threshold = profile.split_threshold(global_threshold_bytes);
    if threshold == 0 {
        return Err(PlanningError::InvalidThreshold);
    }

    let parts = number_of_parts(estimated_total_bytes, threshold);
    debug!(
        estimated_total_bytes,
        threshold, parts, "computed number of parts"
    );
    plan_with_parts(total_pages, parts)
}

/// Turns planned ranges into parts with their own slice of `page_links`.
///
/// # Errors
///
/// Returns [`PlanningError::LinkCountMismatch`] if a range reaches past the
/// end of `page_links`.
pub fn split_into_parts(
    ranges: &[PageRange],
    page_links: &[String],
) -> Result<Vec<DownloadPart>, PlanningError> {
    let total_parts = ranges.len();
    ranges
        .iter()
        .enumerate()
        .map(|(part_index, range)| {
            let links = range
                .slice(page_links)
                .ok_or(PlanningError::LinkCountMismatch {
                    expected: range.end_page as usize,
                    actual: page_links.len(),
                })?;
            Ok(DownloadPart {
                part_index,
                total_parts,
                range: *range,
                page_links: links.to_vec(),
            })
        })
        .collect()
}

/// Stateful front-end for planning that carries the global threshold.
#[derive(Debug, Clone, Copy)]
pub struct PartPlanner {
    global_threshold_bytes: u64,
}

impl PartPlanner {
    /// Creates a planner using `global_threshold_bytes` when a profile has none.
    #[must_use]
    pub const fn new(global_threshold_bytes: u64) -> Self {
        Self {
            global_threshold_bytes,
        }
    }

    /// Returns the configured global threshold.
    #[must_use]
    pub const fn global_threshold_bytes(&self) -> u64 {
        self.global_threshold_bytes
    }

    /// Plans ranges; see [`plan`].
    ///
    /// # Errors
    ///
    /// Same as [`plan`].
    pub fn plan(
        &self,
        total_pages: u32,
        estimated_total_bytes: u64,
        profile: &LibraryProfile,
    ) -> Result<Vec<PageRange>, PlanningError> {
        plan(
            total_pages,
            estimated_total_bytes,
            profile,
            self.global_threshold_bytes,
        )
    }

    /// Plans ranges and slices `page_links` into parts in one step.
    ///
    /// # Errors
    ///
    /// Returns [`PlanningError`] when planning fails or the link list does not
    /// match `total_pages`.
    pub fn plan_parts(
        &self,
        total_pages: u32,
        estimated_total_bytes: u64,
        profile: &LibraryProfile,
        page_links: &[String],
    ) -> Result<Vec<DownloadPart>, PlanningError> {
        if page_links.len() != total_pages as usize {
            return Err(PlanningError::LinkCountMismatch {
                expected: total_pages as usize,
                actual: page_links.len(),
            });
        }
        let ranges = self.plan(total_pages, estimated_total_bytes, profile)?;
        split_into_parts(&ranges, page_links)
    }
}
