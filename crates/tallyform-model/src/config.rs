use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One model configuration entry.
///
/// The `name` identifies the configuration in experiment summaries; the
/// same model id can appear under several names with different parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Base URL of an OpenAI-compatible completions endpoint.
    pub endpoint: String,
    /// Model identifier sent in the request body.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Extraction runs deterministic; leave at 0 unless experimenting.
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    4096
}

/// Model registry loaded from a TOML file: extraction configurations plus
/// an optional, independently credentialed judge model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRegistry {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<ModelConfig>,
}

impl ModelRegistry {
    /// Look up an extraction configuration by name.
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|config| config.name == name)
    }
}

/// Errors loading the model registry file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Load the model registry from a TOML file.
pub fn load_model_registry(path: &Path) -> Result<ModelRegistry, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let registry: ModelRegistry = toml::from_str(&content)?;
    Ok(registry)
}
