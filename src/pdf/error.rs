//! Error types for PDF assembly.

use thiserror::Error;

/// Errors that stop a single part from producing a PDF.
///
/// Sibling parts are unaffected.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Every page of the part was skipped.
    #[error("part {part_number} has no usable pages ({skipped} skipped)")]
    NoUsablePages {
        /// 1-based part number.
        part_number: usize,
        /// Number of skipped pages.
        skipped: usize,
    },

    /// Building or serializing the PDF document failed.
    #[error("failed to write PDF for part {part_number}: {reason}")]
    Pdf {
        /// 1-based part number.
        part_number: usize,
        /// Underlying error message.
        reason: String,
    },

    /// The normalize or writer stage stopped unexpectedly.
    #[error("assembly stage for part {part_number} stopped: {reason}")]
    Stage {
        /// 1-based part number.
        part_number: usize,
        /// What happened.
        reason: String,
    },
}

impl AssemblyError {
    /// Creates a PDF error from any displayable cause.
    pub fn pdf(part_number: usize, reason: impl ToString) -> Self {
        Self::Pdf {
            part_number,
            reason: reason.to_string(),
        }
    }

    /// Creates a stage error.
    pub fn stage(part_number: usize, reason: impl ToString) -> Self {
        Self::Stage {
            part_number,
            reason: reason.to_string(),
        }
    }
}
