//! Core contracts and algorithms for Tallyform.
//!
//! This crate defines the canonical tally-form types, page consolidation,
//! and arithmetic validation shared across the model adapters and the
//! experiment harness.

pub mod consolidate;
pub mod error;
pub mod form;
pub mod validate;

pub use consolidate::{consolidate, consolidate_form_set};
pub use error::{ExtractionError, ExtractionErrorKind};
pub use form::{BallotStats, ConsolidatedForm, FormCategory, HeaderFields, PageRecord, VoteRow};
pub use validate::{validate, CheckEntry, ValidationReport, ALL_CHECKS};

/// Current contract version for extracted form artifacts.
pub const FORM_VERSION: &str = "0.1";
