use serde::{Deserialize, Serialize};
use tracing::debug;

use tallyform_core::ConsolidatedForm;

use crate::client::{GenerateRequest, GenerativeClient, ModelError};
use crate::config::ModelConfig;

/// Severity of one judged discrepancy. Used for downstream filtering and
/// reporting only; it never alters the score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

/// One itemized discrepancy reported by the judge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeFinding {
    pub field: String,
    pub expected: String,
    pub actual: String,
    pub severity: Severity,
}

/// Structured verdict parsed from the judge reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    /// Overall quality score in [0,1].
    pub score: f64,
    pub reasoning: String,
    #[serde(default)]
    pub errors: Vec<JudgeFinding>,
}

const JUDGE_PROMPT: &str = "You are judging the quality of data extracted from a \
scanned election tally form against verified ground truth. Compare the two JSON \
documents across four dimensions: form info (location, date, station), voter \
statistics, ballot statistics (allocated, used, valid, void, no_vote), and vote \
results (per-candidate counts). Respond with a single strict JSON object: \
{\"score\": <float 0..1>, \"reasoning\": <string>, \"errors\": [{\"field\": \
<string>, \"expected\": <string>, \"actual\": <string>, \"severity\": \
\"minor\"|\"major\"|\"critical\"}]}. No text outside the JSON object.";

/// Client for the secondary judge model.
///
/// Configured independently from the extractor and used only for scoring;
/// it never performs extraction.
pub struct JudgeClient {
    client: GenerativeClient,
}

impl JudgeClient {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        Ok(Self {
            client: GenerativeClient::new(config)?,
        })
    }

    /// Score one extracted form against its ground truth.
    pub async fn judge(
        &self,
        output: &ConsolidatedForm,
        expected: &ConsolidatedForm,
    ) -> Result<JudgeVerdict, ModelError> {
        let prompt = build_judge_prompt(output, expected)?;

        debug!(event = "judge_request", model = %self.client.config().model);
        let raw = self
            .client
            .generate(GenerateRequest {
                prompt,
                image_url: None,
            })
            .await?;

        parse_verdict(&raw)
    }
}

fn build_judge_prompt(
    output: &ConsolidatedForm,
    expected: &ConsolidatedForm,
) -> Result<String, ModelError> {
    // Validation metadata is pipeline-internal; the judge sees only data.
    let mut output = output.clone();
    output.validation = None;
    let mut expected = expected.clone();
    expected.validation = None;

    let output_json =
        serde_json::to_string_pretty(&output).map_err(|err| ModelError::Parse(err.to_string()))?;
    let expected_json =
        serde_json::to_string_pretty(&expected).map_err(|err| ModelError::Parse(err.to_string()))?;

    Ok(format!(
        "{JUDGE_PROMPT}\n\nEXTRACTED OUTPUT:\n{output_json}\n\nGROUND TRUTH:\n{expected_json}"
    ))
}

/// Parse a strict-JSON judge reply. The score is clamped into [0,1].
pub(crate) fn parse_verdict(raw: &str) -> Result<JudgeVerdict, ModelError> {
    let trimmed = raw.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|inner| inner.strip_suffix("```").unwrap_or(inner).trim())
        .unwrap_or(trimmed);

    let mut verdict: JudgeVerdict =
        serde_json::from_str(cleaned).map_err(|err| ModelError::Parse(err.to_string()))?;

    if !verdict.score.is_finite() {
        return Err(ModelError::Parse(format!(
            "non-finite score: {}",
            verdict.score
        )));
    }
    verdict.score = verdict.score.clamp(0.0, 1.0);
    Ok(verdict)
}
