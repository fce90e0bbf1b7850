use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tallyform_core::{BallotStats, ConsolidatedForm, ExtractionError, ValidationReport, VoteRow};

use crate::errors::EvalError;
use crate::score::{EvaluationResult, QualityLabel, Score};

/// Everything an evaluator may look at for one record.
pub struct RecordContext<'a> {
    pub output: &'a ConsolidatedForm,
    pub expected: &'a ConsolidatedForm,
    pub extraction_errors: &'a [ExtractionError],
    pub validation: &'a ValidationReport,
}

/// A pure per-record evaluator scoring one dimension.
pub trait RecordEvaluator: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &RecordContext<'_>) -> Result<EvaluationResult, EvalError>;
}

/// The fixed evaluator set registered for every experiment.
pub fn default_evaluators() -> Vec<Arc<dyn RecordEvaluator>> {
    vec![
        Arc::new(ExactMatch),
        Arc::new(BallotAccuracy),
        Arc::new(VoteResultsQuality),
        Arc::new(ErrorAbsence),
    ]
}

/// Run all evaluators over one record, fault-isolated.
///
/// An evaluator that returns an error or panics becomes a failing result
/// with score 0 and the message as reasoning; its siblings still run.
pub fn run_evaluators(
    evaluators: &[Arc<dyn RecordEvaluator>],
    ctx: &RecordContext<'_>,
) -> Vec<EvaluationResult> {
    evaluators
        .iter()
        .map(|evaluator| {
            let name = evaluator.name();
            match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(ctx))) {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => failing_result(name, err.to_string()),
                Err(panic) => failing_result(name, panic_message(panic)),
            }
        })
        .collect()
}

fn failing_result(name: &str, reason: String) -> EvaluationResult {
    tracing::warn!(event = "evaluator_failed", evaluator = name, reason = %reason);
    EvaluationResult {
        evaluator: name.to_string(),
        score: Score::Ratio { value: 0.0 },
        reasoning: Some(reason),
        findings: Vec::new(),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "evaluator panicked".to_string()
    }
}

/// Structural equality after whitespace and number-format normalization.
pub struct ExactMatch;

impl RecordEvaluator for ExactMatch {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn evaluate(&self, ctx: &RecordContext<'_>) -> Result<EvaluationResult, EvalError> {
        let matched = normalized(ctx.output) == normalized(ctx.expected);
        Ok(EvaluationResult::new(
            self.name(),
            Score::Bool { value: matched },
        ))
    }
}

/// Ratio of matching ballot-statistics fields, in [0,1].
pub struct BallotAccuracy;

impl RecordEvaluator for BallotAccuracy {
    fn name(&self) -> &'static str {
        "ballot_accuracy"
    }

    fn evaluate(&self, ctx: &RecordContext<'_>) -> Result<EvaluationResult, EvalError> {
        let fields = [
            stat_pair(&ctx.output.ballots, &ctx.expected.ballots, StatField::Allocated),
            stat_pair(&ctx.output.ballots, &ctx.expected.ballots, StatField::Used),
            stat_pair(&ctx.output.ballots, &ctx.expected.ballots, StatField::Valid),
            stat_pair(&ctx.output.ballots, &ctx.expected.ballots, StatField::Void),
            stat_pair(&ctx.output.ballots, &ctx.expected.ballots, StatField::NoVote),
        ];
        let matching = fields.iter().filter(|(a, b)| a == b).count();
        let value = matching as f64 / fields.len() as f64;
        Ok(EvaluationResult::new(self.name(), Score::Ratio { value }))
    }
}

enum StatField {
    Allocated,
    Used,
    Valid,
    Void,
    NoVote,
}

fn stat_pair(
    output: &BallotStats,
    expected: &BallotStats,
    field: StatField,
) -> (Option<i64>, Option<i64>) {
    match field {
        StatField::Allocated => (output.allocated, expected.allocated),
        StatField::Used => (output.used, expected.used),
        StatField::Valid => (output.valid, expected.valid),
        StatField::Void => (output.void, expected.void),
        StatField::NoVote => (output.no_vote, expected.no_vote),
    }
}

/// Categorical quality of the vote table, from the fraction of expected
/// candidate rows whose count matches.
pub struct VoteResultsQuality;

impl RecordEvaluator for VoteResultsQuality {
    fn name(&self) -> &'static str {
        "vote_results_quality"
    }

    fn evaluate(&self, ctx: &RecordContext<'_>) -> Result<EvaluationResult, EvalError> {
        let expected_rows = &ctx.expected.votes;
        let fraction = if expected_rows.is_empty() {
            1.0
        } else {
            let matching = expected_rows
                .iter()
                .filter(|expected_row| {
                    ctx.output
                        .vote_row(expected_row.candidate_number)
                        .is_some_and(|row| row.count == expected_row.count)
                })
                .count();
            matching as f64 / expected_rows.len() as f64
        };

        Ok(EvaluationResult::new(
            self.name(),
            Score::Label {
                label: QualityLabel::from_fraction(fraction),
                fraction,
            },
        ))
    }
}

/// True iff no page failed extraction and the composite check passed.
pub struct ErrorAbsence;

impl RecordEvaluator for ErrorAbsence {
    fn name(&self) -> &'static str {
        "error_absence"
    }

    fn evaluate(&self, ctx: &RecordContext<'_>) -> Result<EvaluationResult, EvalError> {
        let clean = ctx.extraction_errors.is_empty() && ctx.validation.passed();
        Ok(EvaluationResult::new(
            self.name(),
            Score::Bool { value: clean },
        ))
    }
}

/// Normalized copy for structural comparison: validation stripped, text
/// whitespace collapsed, vote rows keyed by candidate number.
fn normalized(form: &ConsolidatedForm) -> ConsolidatedForm {
    let mut copy = form.clone();
    copy.validation = None;
    copy.page_count = 0;
    copy.header.location = copy.header.location.as_deref().map(normalize_text);
    copy.header.date = copy.header.date.as_deref().map(normalize_text);
    copy.header.station = copy.header.station.as_deref().map(normalize_text);
    copy.votes = normalized_votes(&form.votes);
    copy
}

fn normalized_votes(rows: &[VoteRow]) -> Vec<VoteRow> {
    let mut rows: Vec<VoteRow> = rows
        .iter()
        .map(|row| VoteRow {
            candidate_number: row.candidate_number,
            candidate_name: row.candidate_name.as_deref().map(normalize_text),
            count: row.count,
            count_text: row.count_text.as_deref().map(normalize_text),
        })
        .collect();
    rows.sort_by_key(|row| row.candidate_number);
    rows
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
