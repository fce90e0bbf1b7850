//! Experiment harness for Tallyform.
//!
//! Per-record evaluators, the judge evaluator, the dataset-store boundary,
//! and the experiment runner that compares model configurations over a
//! labeled sample with bounded parallelism.

pub mod dataset;
pub mod errors;
pub mod evaluators;
pub mod judge;
pub mod runner;
pub mod score;
pub mod sink;
pub mod summary;

pub use dataset::{DatasetStore, FileDatasetStore, FormSetInput, InMemoryDatasetStore, LabeledRecord};
pub use errors::{EvalError, ExperimentError};
pub use evaluators::{default_evaluators, run_evaluators, RecordContext, RecordEvaluator};
pub use judge::JudgeEvaluator;
pub use runner::{
    CancelHandle, ExperimentOutcome, ExperimentRunner, ExtractorProvider, GenerativeProvider,
    RunOptions, RunState,
};
pub use score::{EvaluationResult, QualityLabel, Score};
pub use sink::{ResultSink, TracingSink};
pub use summary::{AggregateKind, AggregateValue, ExperimentComparison, ExperimentSummary};
