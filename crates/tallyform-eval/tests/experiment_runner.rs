use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use tallyform_core::{
    BallotStats, ConsolidatedForm, ExtractionError, FormCategory, HeaderFields, PageRecord,
    VoteRow,
};
use tallyform_eval::{
    ExperimentRunner, ExtractorProvider, FormSetInput, InMemoryDatasetStore, JudgeEvaluator,
    LabeledRecord, RunOptions, RunState, TracingSink,
};
use tallyform_model::{ModelConfig, ModelError, PageExtractor, PageImage};

/// Extractor that reads the "image" bytes as a JSON page payload, so tests
/// script model behavior through the page files themselves.
struct ScriptedExtractor;

#[derive(Debug, Default, Deserialize)]
struct ScriptedPage {
    #[serde(default)]
    category: Option<FormCategory>,
    #[serde(default)]
    header: HeaderFields,
    #[serde(default)]
    ballots: Option<BallotStats>,
    #[serde(default)]
    votes: Vec<VoteRow>,
}

#[async_trait]
impl PageExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        image: &PageImage,
        page_index: usize,
    ) -> Result<PageRecord, ExtractionError> {
        if image.bytes == b"TRANSIENT" {
            return Err(ExtractionError::Transient("scripted timeout".to_string()));
        }
        let page: ScriptedPage = serde_json::from_slice(&image.bytes).map_err(|err| {
            ExtractionError::SchemaViolation {
                reason: err.to_string(),
                raw: String::from_utf8_lossy(&image.bytes).into_owned(),
            }
        })?;
        Ok(PageRecord {
            page_index,
            category: page.category,
            header: page.header,
            ballots: page.ballots,
            votes: page.votes,
        })
    }
}

struct ScriptedProvider;

impl ExtractorProvider for ScriptedProvider {
    fn extractor_for(&self, _config: &ModelConfig) -> Result<Arc<dyn PageExtractor>, ModelError> {
        Ok(Arc::new(ScriptedExtractor))
    }
}

/// Provider whose extractor can never be built.
struct BrokenProvider;

impl ExtractorProvider for BrokenProvider {
    fn extractor_for(&self, config: &ModelConfig) -> Result<Arc<dyn PageExtractor>, ModelError> {
        Err(ModelError::NotConfigured(format!(
            "no credentials for {}",
            config.name
        )))
    }
}

fn config(name: &str) -> ModelConfig {
    ModelConfig {
        name: name.to_string(),
        endpoint: "http://localhost:9/v1".to_string(),
        model: "scripted".to_string(),
        api_key: None,
        temperature: 0.0,
        timeout_secs: 5,
        max_tokens: 256,
    }
}

fn runner(provider: Arc<dyn ExtractorProvider>) -> ExperimentRunner {
    ExperimentRunner::new(
        provider,
        tallyform_eval::default_evaluators(),
        JudgeEvaluator::disabled(),
        Arc::new(TracingSink),
    )
}

/// Scratch directory holding scripted page files for one test.
struct Scratch {
    root: PathBuf,
}

impl Scratch {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("tallyform-runner-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn page(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn expected_form(valid: i64, counts: &[(u32, i64)]) -> ConsolidatedForm {
    ConsolidatedForm {
        category: Some(FormCategory::Constituency),
        header: HeaderFields {
            location: Some("District 4".to_string()),
            date: Some("2023-05-14".to_string()),
            station: Some("Station 12".to_string()),
        },
        ballots: BallotStats {
            allocated: Some(600),
            used: Some(valid + 20),
            valid: Some(valid),
            void: Some(15),
            no_vote: Some(5),
        },
        votes: counts
            .iter()
            .map(|&(number, count)| VoteRow {
                candidate_number: number,
                candidate_name: Some(format!("Candidate {number}")),
                count: Some(count),
                count_text: None,
            })
            .collect(),
        page_count: 1,
        validation: None,
    }
}

/// A single scripted page that consolidates into `expected_form(valid, counts)`.
fn page_json(valid: i64, counts: &[(u32, i64)]) -> String {
    let votes: Vec<serde_json::Value> = counts
        .iter()
        .map(|&(number, count)| {
            serde_json::json!({
                "candidate_number": number,
                "candidate_name": format!("Candidate {number}"),
                "count": count,
            })
        })
        .collect();
    serde_json::json!({
        "category": "constituency",
        "header": {
            "location": "District 4",
            "date": "2023-05-14",
            "station": "Station 12",
        },
        "ballots": {
            "allocated": 600,
            "used": valid + 20,
            "valid": valid,
            "void": 15,
            "no_vote": 5,
        },
        "votes": votes,
    })
    .to_string()
}

fn record(id: &str, pages: Vec<PathBuf>, expected: ConsolidatedForm) -> LabeledRecord {
    LabeledRecord {
        id: id.to_string(),
        input: FormSetInput { pages },
        expected,
    }
}

#[tokio::test]
async fn aggregates_cover_the_full_evaluator_set() {
    let scratch = Scratch::new();
    let page = scratch.page("r1-p0.json", &page_json(480, &[(1, 300), (2, 180)]));
    let store = InMemoryDatasetStore::with_dataset(
        "forms",
        vec![record("r1", vec![page], expected_form(480, &[(1, 300), (2, 180)]))],
    );

    let runner = runner(Arc::new(ScriptedProvider));
    let outcome = runner
        .run(
            &store,
            "forms",
            None,
            &[config("flash")],
            &RunOptions {
                sample_size: 10,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.sample_size, 1);
    assert_eq!(outcome.summaries.len(), 1);
    let summary = &outcome.summaries[0];
    assert_eq!(summary.state, RunState::Done);
    assert_eq!(summary.total_records, 1);
    assert_eq!(summary.successful_records, 1);

    for evaluator in [
        "exact_match",
        "ballot_accuracy",
        "vote_results_quality",
        "error_absence",
        "judge",
    ] {
        assert!(
            summary.aggregates.contains_key(evaluator),
            "missing aggregate for {evaluator}"
        );
    }

    // Scripted page matches the label exactly; 480 + 15 + 5 = 500 used.
    assert_eq!(summary.aggregates["exact_match"].value, 1.0);
    assert_eq!(summary.aggregates["error_absence"].value, 1.0);
    // Judge is disabled, so it degrades to zero instead of failing the run.
    assert_eq!(summary.aggregates["judge"].value, 0.0);
}

#[tokio::test]
async fn sample_is_a_deterministic_prefix_of_the_dataset() {
    let scratch = Scratch::new();
    let good = page_json(480, &[(1, 300)]);
    let records = vec![
        record("r1", vec![scratch.page("r1.json", &good)], expected_form(480, &[(1, 300)])),
        record("r2", vec![scratch.page("r2.json", &good)], expected_form(480, &[(1, 300)])),
        // Beyond the sample prefix: a missing page file would fail the
        // record if it were ever issued.
        record(
            "r3",
            vec![scratch.root.join("does-not-exist.json")],
            expected_form(480, &[(1, 300)]),
        ),
    ];
    let store = InMemoryDatasetStore::with_dataset("forms", records);

    let runner = runner(Arc::new(ScriptedProvider));
    let options = RunOptions {
        sample_size: 2,
        ..RunOptions::default()
    };

    let first = runner
        .run(&store, "forms", None, &[config("flash")], &options)
        .await
        .unwrap();
    let second = runner
        .run(&store, "forms", None, &[config("flash")], &options)
        .await
        .unwrap();

    assert_eq!(first.sample_size, 2);
    assert_eq!(first.summaries[0].failed_records, 0);
    // Same sample, same scripted model, same summary.
    assert_eq!(first.summaries, second.summaries);
}

#[tokio::test]
async fn failed_records_are_counted_and_excluded() {
    let scratch = Scratch::new();
    let good = page_json(480, &[(1, 300)]);
    let records = vec![
        record("r1", vec![scratch.page("r1.json", &good)], expected_form(480, &[(1, 300)])),
        record(
            "r2",
            vec![scratch.root.join("missing.json")],
            expected_form(480, &[(1, 300)]),
        ),
        record("r3", vec![scratch.page("r3.json", &good)], expected_form(480, &[(1, 300)])),
    ];
    let store = InMemoryDatasetStore::with_dataset("forms", records);

    let runner = runner(Arc::new(ScriptedProvider));
    let outcome = runner
        .run(
            &store,
            "forms",
            None,
            &[config("flash")],
            &RunOptions {
                sample_size: 3,
                fail_fast: false,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    let summary = &outcome.summaries[0];
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.successful_records, 2);
    assert_eq!(summary.failed_records, 1);
    // Failed records are absent from aggregates, not zeroed.
    assert_eq!(summary.aggregates["exact_match"].count, 2);
    assert_eq!(summary.aggregates["exact_match"].value, 1.0);
}

#[tokio::test]
async fn fail_fast_aborts_on_the_first_record_failure() {
    let scratch = Scratch::new();
    let records = vec![record(
        "r1",
        vec![scratch.root.join("missing.json")],
        expected_form(480, &[(1, 300)]),
    )];
    let store = InMemoryDatasetStore::with_dataset("forms", records);

    let runner = runner(Arc::new(ScriptedProvider));
    let result = runner
        .run(
            &store,
            "forms",
            None,
            &[config("flash")],
            &RunOptions {
                sample_size: 1,
                fail_fast: true,
                ..RunOptions::default()
            },
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn fail_fast_halts_issuance_after_the_first_failure() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Counts extract calls, then crashes the record task.
    struct CrashingExtractor {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageExtractor for CrashingExtractor {
        async fn extract(
            &self,
            _image: &PageImage,
            _page_index: usize,
        ) -> Result<PageRecord, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("extraction backend crashed");
        }
    }

    struct CrashingProvider {
        calls: Arc<AtomicUsize>,
    }

    impl ExtractorProvider for CrashingProvider {
        fn extractor_for(
            &self,
            _config: &ModelConfig,
        ) -> Result<Arc<dyn PageExtractor>, ModelError> {
            Ok(Arc::new(CrashingExtractor {
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    let scratch = Scratch::new();
    let good = page_json(480, &[(1, 300)]);
    let records: Vec<LabeledRecord> = (0..6)
        .map(|index| {
            record(
                &format!("r{index}"),
                vec![scratch.page(&format!("r{index}.json"), &good)],
                expected_form(480, &[(1, 300)]),
            )
        })
        .collect();
    let store = InMemoryDatasetStore::with_dataset("forms", records);

    let calls = Arc::new(AtomicUsize::new(0));
    let runner = runner(Arc::new(CrashingProvider {
        calls: Arc::clone(&calls),
    }));
    let result = runner
        .run(
            &store,
            "forms",
            None,
            &[config("flash")],
            &RunOptions {
                sample_size: 6,
                max_parallel: 1,
                fail_fast: true,
            },
        )
        .await;

    assert!(result.is_err());
    // With one in-flight record at a time, the first crash is observed
    // before the whole sample is issued.
    assert!(
        calls.load(Ordering::SeqCst) < 6,
        "all records were issued despite fail_fast"
    );
}

#[tokio::test]
async fn page_extraction_errors_degrade_the_record_without_failing_it() {
    let scratch = Scratch::new();
    let pages = vec![
        scratch.page("r1-p0.json", &page_json(480, &[(1, 300)])),
        scratch.page("r1-p1.json", "TRANSIENT"),
    ];
    let store = InMemoryDatasetStore::with_dataset(
        "forms",
        vec![record("r1", pages, expected_form(480, &[(1, 300)]))],
    );

    let runner = runner(Arc::new(ScriptedProvider));
    let outcome = runner
        .run(
            &store,
            "forms",
            None,
            &[config("flash")],
            &RunOptions {
                sample_size: 1,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    let summary = &outcome.summaries[0];
    // The surviving page still produced a consolidated form.
    assert_eq!(summary.successful_records, 1);
    assert_eq!(summary.aggregates["exact_match"].value, 1.0);
    // The failed page shows up as an extraction error, not a clean record.
    assert_eq!(summary.aggregates["error_absence"].value, 0.0);
}

#[tokio::test]
async fn unavailable_configuration_fails_alone_and_others_still_rank() {
    let scratch = Scratch::new();
    let page = scratch.page("r1.json", &page_json(480, &[(1, 300)]));
    let store = InMemoryDatasetStore::with_dataset(
        "forms",
        vec![record("r1", vec![page], expected_form(480, &[(1, 300)]))],
    );

    struct SplitProvider;
    impl ExtractorProvider for SplitProvider {
        fn extractor_for(
            &self,
            config: &ModelConfig,
        ) -> Result<Arc<dyn PageExtractor>, ModelError> {
            if config.name == "broken" {
                BrokenProvider.extractor_for(config)
            } else {
                ScriptedProvider.extractor_for(config)
            }
        }
    }

    let runner = runner(Arc::new(SplitProvider));
    let outcome = runner
        .run(
            &store,
            "forms",
            None,
            &[config("flash"), config("broken")],
            &RunOptions {
                sample_size: 1,
                fail_fast: false,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    let flash = &outcome.comparison.summaries["flash"];
    let broken = &outcome.comparison.summaries["broken"];
    assert_eq!(flash.state, RunState::Done);
    assert_eq!(broken.state, RunState::Failed);
    assert!(broken.failure_reason.is_some());
    assert_eq!(broken.failed_records, 1);

    let ranked = outcome.comparison.ranked_by("exact_match");
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].0, "flash");
}

#[tokio::test]
async fn cancellation_stops_issuing_and_marks_the_rest_failed() {
    let scratch = Scratch::new();
    let good = page_json(480, &[(1, 300)]);
    let records: Vec<LabeledRecord> = (0..4)
        .map(|index| {
            record(
                &format!("r{index}"),
                vec![scratch.page(&format!("r{index}.json"), &good)],
                expected_form(480, &[(1, 300)]),
            )
        })
        .collect();
    let store = InMemoryDatasetStore::with_dataset("forms", records);

    let runner = runner(Arc::new(ScriptedProvider));
    // Cancel up front: nothing gets issued, every record counts failed.
    runner.cancel_handle().cancel();

    let outcome = runner
        .run(
            &store,
            "forms",
            None,
            &[config("flash")],
            &RunOptions {
                sample_size: 4,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    let summary = &outcome.summaries[0];
    assert_eq!(summary.state, RunState::Failed);
    assert_eq!(summary.total_records, 4);
    assert_eq!(summary.failed_records, 4);
    assert!(summary
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("cancelled")));
}
