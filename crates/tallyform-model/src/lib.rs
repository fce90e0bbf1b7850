//! Generative-model boundary for Tallyform.
//!
//! Two narrow contracts live here: the page extractor (vision model,
//! schema-constrained output) and the judge client (text model scoring an
//! extraction against ground truth). Both are plain HTTP calls behind
//! traits so the pipeline and the experiment harness can mock them.

pub mod client;
pub mod config;
pub mod extractor;
pub mod judge;

pub use client::{GenerativeClient, ModelError};
pub use config::{load_model_registry, ConfigError, ModelConfig, ModelRegistry};
pub use extractor::{GenerativeExtractor, ImageFormat, PageExtractor, PageImage};
pub use judge::{JudgeClient, JudgeFinding, JudgeVerdict, Severity};
