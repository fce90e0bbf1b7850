use thiserror::Error;

use tallyform_model::ModelError;

/// Errors from evaluators and the dataset store.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluator failure: {0}")]
    Evaluator(String),
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort an experiment run or configuration.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("dataset error: {0}")]
    Dataset(#[from] EvalError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    /// Record-level failure; only fatal under `fail_fast`.
    #[error("record '{record_id}' failed: {reason}")]
    RecordFailed { record_id: String, reason: String },
    #[error("task scheduling error: {0}")]
    Scheduling(String),
}
