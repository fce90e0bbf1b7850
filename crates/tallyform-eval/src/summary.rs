use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::runner::RunState;
use crate::score::EvaluationResult;

/// How an aggregate was computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    /// Mean over records with a result.
    Mean,
    /// Proportion of true results (boolean evaluators).
    Proportion,
}

/// One evaluator's aggregate for a configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateValue {
    pub kind: AggregateKind,
    pub value: f64,
    /// Records that contributed; failed records are absent, never zeroed.
    pub count: u64,
}

/// Per-configuration aggregate over the sampled records. Immutable once
/// built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentSummary {
    pub configuration: String,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub total_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub aggregates: BTreeMap<String, AggregateValue>,
}

/// Streaming reducer for one configuration: a running sum and count per
/// evaluator, so large samples never materialize all per-record results.
pub struct SummaryAccumulator {
    configuration: String,
    total_records: u64,
    successful_records: u64,
    failed_records: u64,
    stats: BTreeMap<String, RunningStat>,
}

struct RunningStat {
    sum: f64,
    count: u64,
    boolean: bool,
}

impl SummaryAccumulator {
    pub fn new(configuration: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
            total_records: 0,
            successful_records: 0,
            failed_records: 0,
            stats: BTreeMap::new(),
        }
    }

    /// Fold in one successfully processed record.
    pub fn record_success(&mut self, results: &[EvaluationResult]) {
        self.total_records += 1;
        self.successful_records += 1;
        for result in results {
            let stat = self
                .stats
                .entry(result.evaluator.clone())
                .or_insert(RunningStat {
                    sum: 0.0,
                    count: 0,
                    boolean: result.score.is_boolean(),
                });
            stat.sum += result.score.as_f64();
            stat.count += 1;
        }
    }

    /// Fold in one failed record: counted, scores absent.
    pub fn record_failure(&mut self) {
        self.total_records += 1;
        self.failed_records += 1;
    }

    pub fn into_summary(self, state: RunState, failure_reason: Option<String>) -> ExperimentSummary {
        let aggregates = self
            .stats
            .into_iter()
            .map(|(name, stat)| {
                let kind = if stat.boolean {
                    AggregateKind::Proportion
                } else {
                    AggregateKind::Mean
                };
                let value = if stat.count > 0 {
                    stat.sum / stat.count as f64
                } else {
                    0.0
                };
                (
                    name,
                    AggregateValue {
                        kind,
                        value,
                        count: stat.count,
                    },
                )
            })
            .collect();

        ExperimentSummary {
            configuration: self.configuration,
            state,
            failure_reason,
            total_records: self.total_records,
            successful_records: self.successful_records,
            failed_records: self.failed_records,
            aggregates,
        }
    }
}

/// Cross-configuration comparison for one run, keyed by configuration
/// name. Order-independent: results are keyed by identity, not arrival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentComparison {
    pub run_id: String,
    pub summaries: BTreeMap<String, ExperimentSummary>,
}

impl ExperimentComparison {
    pub fn new(run_id: impl Into<String>, summaries: Vec<ExperimentSummary>) -> Self {
        Self {
            run_id: run_id.into(),
            summaries: summaries
                .into_iter()
                .map(|summary| (summary.configuration.clone(), summary))
                .collect(),
        }
    }

    /// Configurations ranked by one aggregate metric, best first.
    /// Configurations without that metric are omitted.
    pub fn ranked_by(&self, metric: &str) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .summaries
            .iter()
            .filter_map(|(name, summary)| {
                summary
                    .aggregates
                    .get(metric)
                    .map(|aggregate| (name.as_str(), aggregate.value))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}
