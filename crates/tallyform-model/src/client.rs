use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ModelConfig;

/// Errors from the generative-model HTTP boundary.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No configuration available for the requested capability.
    #[error("model not configured: {0}")]
    NotConfigured(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("api error: HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
}

/// Thin client for an OpenAI-compatible chat-completions endpoint.
///
/// One instance per model configuration; the per-request timeout comes
/// from the configuration, and no retry happens at this boundary.
pub struct GenerativeClient {
    config: ModelConfig,
    client: Client,
}

/// One request to the model: a text prompt plus an optional inline image.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Data URL (`data:image/png;base64,...`) for vision requests.
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl GenerativeClient {
    /// Build a client for one model configuration.
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| ModelError::Connection(err.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Send one request and return the raw text content of the reply.
    pub async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
        let mut content = vec![ContentPart::Text {
            text: request.prompt,
        }];
        if let Some(url) = request.image_url {
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            });
        }

        let body = ChatRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
        };

        let url = format!("{}/chat/completions", self.config.endpoint);
        debug!(event = "model_request", model = %self.config.model, url = %url);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|err| ModelError::Connection(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = resp
            .json()
            .await
            .map_err(|err| ModelError::Parse(err.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Parse("response contains no choices".to_string()))
    }
}
