use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single page extraction.
///
/// Extraction errors are data: the consolidator skips the failed page and
/// the request records the error, so one bad page never aborts a form set.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionError {
    /// The model replied, but the reply does not conform to the page schema.
    #[error("schema violation: {reason}")]
    SchemaViolation {
        reason: String,
        /// Raw model output, kept for failure attribution.
        raw: String,
    },
    /// Transport-level failure (timeout, rate limit, connection reset).
    /// The caller may retry; the adapter itself never does.
    #[error("transient extraction failure: {0}")]
    Transient(String),
    /// The endpoint rejected the request itself; retrying cannot help.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The page payload is not in the image allow-list.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Coarse classification of an extraction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    SchemaViolation,
    Transient,
    Rejected,
    UnsupportedFormat,
}

impl ExtractionError {
    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            ExtractionError::SchemaViolation { .. } => ExtractionErrorKind::SchemaViolation,
            ExtractionError::Transient(_) => ExtractionErrorKind::Transient,
            ExtractionError::Rejected(_) => ExtractionErrorKind::Rejected,
            ExtractionError::UnsupportedFormat(_) => ExtractionErrorKind::UnsupportedFormat,
        }
    }
}
