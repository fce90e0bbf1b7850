use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tallyform_core::{BallotStats, ExtractionError, FormCategory, HeaderFields, PageRecord, VoteRow};

use crate::client::{GenerateRequest, GenerativeClient, ModelError};
use crate::config::ModelConfig;

/// Image formats accepted by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// Sniff the payload's format; only the allow-list passes.
    pub fn detect(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let kind = infer::get(bytes)
            .ok_or_else(|| ExtractionError::UnsupportedFormat("unrecognized payload".to_string()))?;
        match kind.mime_type() {
            "image/png" => Ok(ImageFormat::Png),
            "image/jpeg" => Ok(ImageFormat::Jpeg),
            "image/webp" => Ok(ImageFormat::Webp),
            other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// One page image, opaque bytes.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub bytes: Vec<u8>,
}

impl PageImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encode as a data URL for the vision request.
    fn data_url(&self) -> Result<String, ExtractionError> {
        let format = ImageFormat::detect(&self.bytes)?;
        Ok(format!(
            "data:{};base64,{}",
            format.mime_type(),
            BASE64.encode(&self.bytes)
        ))
    }
}

/// Contract for extracting one page.
///
/// The experiment harness injects this, so extraction models can be
/// swapped or mocked without touching consolidation or validation.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(
        &self,
        image: &PageImage,
        page_index: usize,
    ) -> Result<PageRecord, ExtractionError>;
}

/// Wire shape the model is asked to produce for one page.
///
/// `page_index` is supplied by the caller, not trusted from the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PageWire {
    #[serde(default)]
    category: Option<FormCategory>,
    #[serde(default)]
    header: HeaderFields,
    #[serde(default)]
    ballots: Option<BallotStats>,
    #[serde(default)]
    votes: Vec<VoteRow>,
}

const EXTRACTION_PROMPT: &str = "You are reading one scanned page of an election \
tally form. Extract the header fields (location, date, station), the ballot \
statistics block (allocated, used, valid, void, no_vote), and every row of the \
candidate vote-count table exactly as written, including the count in words. \
Use null for anything not present on this page. Do not infer or compute values.";

/// Page extractor backed by a vision-capable generative model.
pub struct GenerativeExtractor {
    client: GenerativeClient,
    schema: JSONSchema,
    prompt: String,
}

impl GenerativeExtractor {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let schema_json = serde_json::to_value(schemars::schema_for!(PageWire))
            .map_err(|err| ModelError::Parse(err.to_string()))?;
        let schema = JSONSchema::compile(&schema_json)
            .map_err(|err| ModelError::Parse(err.to_string()))?;

        let schema_text = serde_json::to_string_pretty(&schema_json)
            .map_err(|err| ModelError::Parse(err.to_string()))?;
        let prompt = format!(
            "{EXTRACTION_PROMPT}\n\nRespond with a single JSON object conforming \
             to this schema:\n{schema_text}"
        );

        Ok(Self {
            client: GenerativeClient::new(config)?,
            schema,
            prompt,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        self.client.config()
    }
}

#[async_trait]
impl PageExtractor for GenerativeExtractor {
    async fn extract(
        &self,
        image: &PageImage,
        page_index: usize,
    ) -> Result<PageRecord, ExtractionError> {
        let image_url = image.data_url()?;

        debug!(event = "page_extraction_started", page_index);
        let raw = self
            .client
            .generate(GenerateRequest {
                prompt: self.prompt.clone(),
                image_url: Some(image_url),
            })
            .await
            .map_err(classify_model_error)?;

        parse_page_response(&raw, page_index, &self.schema)
    }
}

/// Map a model-boundary failure onto the extraction taxonomy.
///
/// Only failures that can plausibly clear on retry (no reply, timeout,
/// rate limit, server error) are transient; a 4xx invalid request is the
/// request's fault and retrying the same call cannot help.
fn classify_model_error(err: ModelError) -> ExtractionError {
    match err {
        ModelError::NotConfigured(msg) | ModelError::Connection(msg) => {
            ExtractionError::Transient(msg)
        }
        ModelError::Api { status: status @ (408 | 429), body } => {
            ExtractionError::Transient(format!("HTTP {status}: {body}"))
        }
        ModelError::Api { status, body } if status >= 500 => {
            ExtractionError::Transient(format!("HTTP {status}: {body}"))
        }
        ModelError::Api { status, body } => {
            ExtractionError::Rejected(format!("HTTP {status}: {body}"))
        }
        ModelError::Parse(msg) => ExtractionError::SchemaViolation {
            reason: msg,
            raw: String::new(),
        },
    }
}

/// Parse and schema-check one raw model reply into a page record.
pub(crate) fn parse_page_response(
    raw: &str,
    page_index: usize,
    schema: &JSONSchema,
) -> Result<PageRecord, ExtractionError> {
    let cleaned = strip_code_fences(raw);

    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|err| ExtractionError::SchemaViolation {
            reason: format!("reply is not JSON: {err}"),
            raw: raw.to_string(),
        })?;

    if let Err(errors) = schema.validate(&value) {
        let reasons: Vec<String> = errors.map(|err| err.to_string()).collect();
        return Err(ExtractionError::SchemaViolation {
            reason: reasons.join("; "),
            raw: raw.to_string(),
        });
    }

    let wire: PageWire =
        serde_json::from_value(value).map_err(|err| ExtractionError::SchemaViolation {
            reason: err.to_string(),
            raw: raw.to_string(),
        })?;

    Ok(PageRecord {
        page_index,
        category: wire.category,
        header: wire.header,
        ballots: wire.ballots,
        votes: wire.votes,
    })
}

/// Models frequently wrap JSON replies in markdown fences.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
