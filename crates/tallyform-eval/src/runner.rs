use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};
use uuid::Uuid;

use tallyform_core::{
    consolidate, validate, ExtractionError, FormCategory, PageRecord,
};
use tallyform_model::{GenerativeExtractor, ModelConfig, ModelError, PageExtractor, PageImage};

use crate::dataset::{DatasetStore, LabeledRecord};
use crate::errors::ExperimentError;
use crate::evaluators::{run_evaluators, RecordContext, RecordEvaluator};
use crate::judge::JudgeEvaluator;
use crate::score::EvaluationResult;
use crate::sink::{self, RecordEvent, ResultSink};
use crate::summary::{ExperimentComparison, ExperimentSummary, SummaryAccumulator};

/// Lifecycle of an experiment run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Loading,
    Running,
    Aggregating,
    Done,
    Failed,
}

/// Knobs for one experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Records taken from the head of the pulled dataset; the same sample
    /// is used for every configuration.
    pub sample_size: usize,
    /// Concurrent in-flight record tasks per configuration. Kept small to
    /// respect upstream rate limits.
    pub max_parallel: usize,
    /// Abort a configuration on the first record-level failure.
    pub fail_fast: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sample_size: 25,
            max_parallel: 2,
            fail_fast: false,
        }
    }
}

/// Builds a page extractor for one model configuration, so experiments can
/// swap real models for mocks.
pub trait ExtractorProvider: Send + Sync {
    fn extractor_for(&self, config: &ModelConfig) -> Result<Arc<dyn PageExtractor>, ModelError>;
}

/// Default provider: one generative vision extractor per configuration.
pub struct GenerativeProvider;

impl ExtractorProvider for GenerativeProvider {
    fn extractor_for(&self, config: &ModelConfig) -> Result<Arc<dyn PageExtractor>, ModelError> {
        Ok(Arc::new(GenerativeExtractor::new(config.clone())?))
    }
}

/// Result of one full experiment run.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOutcome {
    pub run_id: String,
    /// Records actually sampled (the dataset may be smaller than asked).
    pub sample_size: usize,
    pub summaries: Vec<ExperimentSummary>,
    pub comparison: ExperimentComparison,
}

/// Handle for run-level cancellation: stops issuing new record tasks,
/// in-flight tasks run to completion.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Executes the extraction task over a labeled sample for each model
/// configuration and aggregates per-configuration summaries.
pub struct ExperimentRunner {
    provider: Arc<dyn ExtractorProvider>,
    evaluators: Vec<Arc<dyn RecordEvaluator>>,
    judge: Arc<JudgeEvaluator>,
    sink: Arc<dyn ResultSink>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExperimentRunner {
    pub fn new(
        provider: Arc<dyn ExtractorProvider>,
        evaluators: Vec<Arc<dyn RecordEvaluator>>,
        judge: JudgeEvaluator,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            provider,
            evaluators,
            judge: Arc::new(judge),
            sink,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Runner with the generative extractor, the fixed evaluator set, and
    /// the tracing sink.
    pub fn with_defaults(judge_config: Option<ModelConfig>) -> Self {
        Self::new(
            Arc::new(GenerativeProvider),
            crate::evaluators::default_evaluators(),
            JudgeEvaluator::new(judge_config),
            Arc::new(sink::TracingSink),
        )
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Run the experiment over `configs`, in order.
    ///
    /// The sample is the head of the pulled dataset, identical for every
    /// configuration, so cross-configuration comparison stays valid. With
    /// `fail_fast` unset, record failures are counted and excluded from
    /// aggregates; set, the first failure aborts the configuration and
    /// propagates.
    pub async fn run(
        &self,
        store: &dyn DatasetStore,
        dataset: &str,
        version: Option<&str>,
        configs: &[ModelConfig],
        options: &RunOptions,
    ) -> Result<ExperimentOutcome, ExperimentError> {
        let run_id = Uuid::new_v4().to_string();
        info!(event = "run_state", run_id = %run_id, state = "pending", dataset);

        info!(event = "run_state", run_id = %run_id, state = "loading", dataset);

        let records = store.pull(dataset, version).await?;
        let sample: Vec<LabeledRecord> =
            records.into_iter().take(options.sample_size).collect();
        info!(
            event = "sample_selected",
            run_id = %run_id,
            dataset,
            sample_size = sample.len(),
        );

        let mut summaries = Vec::with_capacity(configs.len());
        for config in configs {
            info!(event = "run_state", run_id = %run_id, state = "running", configuration = %config.name);
            let summary = match self
                .run_configuration(&run_id, config, &sample, options)
                .await
            {
                Ok(summary) => summary,
                Err(err) => {
                    info!(event = "run_state", run_id = %run_id, state = "failed", configuration = %config.name);
                    return Err(err);
                }
            };
            sink::emit(|| self.sink.configuration_summary(&run_id, &summary));
            summaries.push(summary);
        }

        info!(event = "run_state", run_id = %run_id, state = "aggregating");
        let comparison = ExperimentComparison::new(run_id.clone(), summaries.clone());
        info!(event = "run_state", run_id = %run_id, state = "done");

        Ok(ExperimentOutcome {
            run_id,
            sample_size: sample.len(),
            summaries,
            comparison,
        })
    }

    async fn run_configuration(
        &self,
        run_id: &str,
        config: &ModelConfig,
        sample: &[LabeledRecord],
        options: &RunOptions,
    ) -> Result<ExperimentSummary, ExperimentError> {
        let mut acc = SummaryAccumulator::new(&config.name);

        let extractor = match self.provider.extractor_for(config) {
            Ok(extractor) => extractor,
            Err(err) => {
                if options.fail_fast {
                    return Err(err.into());
                }
                warn!(event = "configuration_unavailable", configuration = %config.name, reason = %err);
                for _ in sample {
                    acc.record_failure();
                }
                return Ok(acc.into_summary(RunState::Failed, Some(err.to_string())));
            }
        };

        let semaphore = Arc::new(Semaphore::new(options.max_parallel.max(1)));
        let mut tasks: JoinSet<(String, Result<Vec<EvaluationResult>, ExperimentError>)> =
            JoinSet::new();
        let mut issued = 0usize;
        let mut cancelled = false;

        let mut first_error: Option<ExperimentError> = None;
        for record in sample {
            // Acquiring before spawning bounds issuance, so cancellation
            // stops new tasks while in-flight ones complete.
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|err| ExperimentError::Scheduling(err.to_string()))?;

            // Drain whatever already finished before issuing more, so a
            // fail_fast failure halts issuance instead of only aborting
            // work in flight at drain time.
            while let Some(joined) = tasks.try_join_next() {
                if self.absorb(joined, run_id, config, options, &mut acc, &mut first_error) {
                    tasks.abort_all();
                }
            }
            if first_error.is_some() {
                break;
            }
            if self.cancelled() {
                cancelled = true;
                break;
            }

            let extractor = Arc::clone(&extractor);
            let judge = Arc::clone(&self.judge);
            let evaluators = self.evaluators.clone();
            let record = record.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let record_id = record.id.clone();
                let outcome = process_record(extractor, judge, evaluators, record).await;
                (record_id, outcome)
            });
            issued += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            if self.absorb(joined, run_id, config, options, &mut acc, &mut first_error) {
                tasks.abort_all();
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        if cancelled {
            for _ in issued..sample.len() {
                acc.record_failure();
            }
            return Ok(acc.into_summary(
                RunState::Failed,
                Some("cancelled: remaining records were not issued".to_string()),
            ));
        }

        Ok(acc.into_summary(RunState::Done, None))
    }

    /// Single accumulation point: fold one joined record task into the
    /// accumulator, keyed by record identity regardless of arrival order.
    /// Returns true when the configuration should abort outstanding work.
    fn absorb(
        &self,
        joined: Result<(String, Result<Vec<EvaluationResult>, ExperimentError>), JoinError>,
        run_id: &str,
        config: &ModelConfig,
        options: &RunOptions,
        acc: &mut SummaryAccumulator,
        first_error: &mut Option<ExperimentError>,
    ) -> bool {
        match joined {
            Ok((record_id, Ok(results))) => {
                for result in &results {
                    let event = RecordEvent {
                        run_id,
                        configuration: &config.name,
                        record_id: &record_id,
                        result,
                    };
                    sink::emit(|| self.sink.record_result(&event));
                }
                acc.record_success(&results);
                false
            }
            Ok((record_id, Err(err))) => {
                warn!(event = "record_failed", record_id = %record_id, reason = %err);
                acc.record_failure();
                if options.fail_fast && first_error.is_none() {
                    *first_error = Some(ExperimentError::RecordFailed {
                        record_id,
                        reason: err.to_string(),
                    });
                    return true;
                }
                false
            }
            Err(join_err) => {
                if join_err.is_cancelled() {
                    return false;
                }
                acc.record_failure();
                if options.fail_fast && first_error.is_none() {
                    *first_error = Some(ExperimentError::Scheduling(join_err.to_string()));
                    return true;
                }
                false
            }
        }
    }
}

/// One record task: extract every page concurrently, wait for all page
/// results (join barrier), consolidate, validate, then run the evaluator
/// set and the judge against the configuration's output.
async fn process_record(
    extractor: Arc<dyn PageExtractor>,
    judge: Arc<JudgeEvaluator>,
    evaluators: Vec<Arc<dyn RecordEvaluator>>,
    record: LabeledRecord,
) -> Result<Vec<EvaluationResult>, ExperimentError> {
    let mut images = Vec::with_capacity(record.input.pages.len());
    for path in &record.input.pages {
        let bytes = std::fs::read(path).map_err(|err| ExperimentError::RecordFailed {
            record_id: record.id.clone(),
            reason: format!("cannot read page {}: {err}", path.display()),
        })?;
        images.push(PageImage::new(bytes));
    }

    let mut page_tasks: JoinSet<(usize, Result<PageRecord, ExtractionError>)> = JoinSet::new();
    for (index, image) in images.into_iter().enumerate() {
        let extractor = Arc::clone(&extractor);
        page_tasks.spawn(async move { (index, extractor.extract(&image, index).await) });
    }

    let mut by_index: BTreeMap<usize, PageRecord> = BTreeMap::new();
    let mut extraction_errors = Vec::new();
    while let Some(joined) = page_tasks.join_next().await {
        let (index, result) =
            joined.map_err(|err| ExperimentError::Scheduling(err.to_string()))?;
        match result {
            Ok(page) => {
                by_index.insert(index, page);
            }
            // A failed page is excluded from consolidation and recorded;
            // the remaining pages still form a result.
            Err(err) => extraction_errors.push(err),
        }
    }

    let pages: Vec<PageRecord> = by_index.into_values().collect();
    let mut form = consolidate(&pages);
    let category = form
        .category
        .or(record.expected.category)
        .unwrap_or(FormCategory::Constituency);
    let report = validate(&form, category);
    form.validation = Some(report.clone());

    let ctx = RecordContext {
        output: &form,
        expected: &record.expected,
        extraction_errors: &extraction_errors,
        validation: &report,
    };
    let mut results = run_evaluators(&evaluators, &ctx);
    results.push(judge.evaluate(&form, &record.expected).await);
    Ok(results)
}
