use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::info;

use crate::score::EvaluationResult;
use crate::summary::ExperimentSummary;

/// One per-record evaluator result emitted to telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct RecordEvent<'a> {
    pub run_id: &'a str,
    pub configuration: &'a str,
    pub record_id: &'a str,
    pub result: &'a EvaluationResult,
}

/// Fire-and-forget side channel for experiment telemetry.
///
/// Implementations must swallow their own failures; the runner also
/// shields itself, so a broken sink can never fail the experiment.
pub trait ResultSink: Send + Sync {
    fn record_result(&self, event: &RecordEvent<'_>);
    fn configuration_summary(&self, run_id: &str, summary: &ExperimentSummary);
}

/// Default sink: structured tracing events.
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn record_result(&self, event: &RecordEvent<'_>) {
        info!(
            event = "evaluation_result",
            run_id = event.run_id,
            configuration = event.configuration,
            record_id = event.record_id,
            evaluator = %event.result.evaluator,
            score = event.result.score.as_f64(),
        );
    }

    fn configuration_summary(&self, run_id: &str, summary: &ExperimentSummary) {
        info!(
            event = "configuration_summary",
            run_id,
            configuration = %summary.configuration,
            total = summary.total_records,
            successful = summary.successful_records,
            failed = summary.failed_records,
        );
    }
}

/// Invoke a sink callback, isolating the experiment from sink panics.
pub(crate) fn emit<F: FnOnce()>(callback: F) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!(event = "sink_failure_ignored");
    }
}
