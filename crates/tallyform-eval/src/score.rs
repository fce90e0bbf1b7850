use serde::{Deserialize, Serialize};

use tallyform_model::JudgeFinding;

/// Categorical quality label for the vote-results evaluator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityLabel {
    /// Derive the label from the fraction of matching candidate counts.
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction >= 0.95 {
            QualityLabel::Excellent
        } else if fraction >= 0.8 {
            QualityLabel::Good
        } else if fraction >= 0.5 {
            QualityLabel::Fair
        } else {
            QualityLabel::Poor
        }
    }
}

/// Scalar verdict of one evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Score {
    Bool { value: bool },
    Ratio { value: f64 },
    /// Label plus the underlying fraction, so the aggregate stays numeric.
    Label { label: QualityLabel, fraction: f64 },
}

impl Score {
    /// Numeric projection used by the summary reducer: booleans become
    /// 0/1 (their mean is a proportion), labels contribute their fraction.
    pub fn as_f64(&self) -> f64 {
        match self {
            Score::Bool { value } => {
                if *value {
                    1.0
                } else {
                    0.0
                }
            }
            Score::Ratio { value } => *value,
            Score::Label { fraction, .. } => *fraction,
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Score::Bool { .. })
    }
}

/// One evaluator's verdict on one (output, expected) pair.
///
/// Ephemeral: produced and consumed within a single experiment run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub evaluator: String,
    pub score: Score,
    /// Free-text reasoning; populated by the judge evaluator and by
    /// fault-isolation wrappers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Itemized discrepancies; judge evaluator only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<JudgeFinding>,
}

impl EvaluationResult {
    pub fn new(evaluator: impl Into<String>, score: Score) -> Self {
        Self {
            evaluator: evaluator.into(),
            score,
            reasoning: None,
            findings: Vec::new(),
        }
    }
}
