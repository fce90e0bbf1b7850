use tracing::{error, warn};

use tallyform_core::ConsolidatedForm;
use tallyform_model::{JudgeClient, ModelConfig, ModelError};

use crate::score::{EvaluationResult, Score};

/// Evaluator backed by the secondary judge model.
///
/// Every failure mode degrades to a neutral zero score: a missing
/// configuration, an unreachable endpoint, or an unparseable verdict is
/// logged and scored 0.0, never propagated. The caller runs this under the
/// same concurrency bound as extraction since it is a full model call.
pub struct JudgeEvaluator {
    client: Option<JudgeClient>,
}

impl JudgeEvaluator {
    pub const NAME: &'static str = "judge";

    /// Build from an optional judge configuration.
    pub fn new(config: Option<ModelConfig>) -> Self {
        let client = match config {
            Some(config) => match JudgeClient::new(config) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(event = "judge_unavailable", reason = %err);
                    None
                }
            },
            None => {
                warn!(event = "judge_unconfigured");
                None
            }
        };
        Self { client }
    }

    /// A judge that always degrades; used when judging is switched off.
    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Score one record. Infallible by contract.
    pub async fn evaluate(
        &self,
        output: &ConsolidatedForm,
        expected: &ConsolidatedForm,
    ) -> EvaluationResult {
        let Some(client) = &self.client else {
            return degraded("judge model not configured");
        };

        match client.judge(output, expected).await {
            Ok(verdict) => EvaluationResult {
                evaluator: Self::NAME.to_string(),
                score: Score::Ratio {
                    value: verdict.score,
                },
                reasoning: Some(verdict.reasoning),
                findings: verdict.errors,
            },
            Err(err) => {
                log_failure(&err);
                degraded(&err.to_string())
            }
        }
    }
}

fn log_failure(err: &ModelError) {
    match err {
        ModelError::NotConfigured(_) => warn!(event = "judge_unavailable", reason = %err),
        _ => error!(event = "judge_call_failed", reason = %err),
    }
}

fn degraded(reason: &str) -> EvaluationResult {
    EvaluationResult {
        evaluator: JudgeEvaluator::NAME.to_string(),
        score: Score::Ratio { value: 0.0 },
        reasoning: Some(reason.to_string()),
        findings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_judge_degrades_to_zero_without_raising() {
        let judge = JudgeEvaluator::disabled();
        assert!(!judge.is_configured());

        let form = ConsolidatedForm::default();
        let result = judge.evaluate(&form, &form).await;
        assert_eq!(result.evaluator, "judge");
        assert_eq!(result.score, Score::Ratio { value: 0.0 });
        assert!(result.reasoning.is_some());
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn missing_configuration_behaves_like_disabled() {
        let judge = JudgeEvaluator::new(None);
        let form = ConsolidatedForm::default();
        let result = judge.evaluate(&form, &form).await;
        assert_eq!(result.score, Score::Ratio { value: 0.0 });
    }
}
