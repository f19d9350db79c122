//! Configuration for the generative model client

use crate::error::{LlmError, LlmResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Model endpoint and generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible chat completions URL
    #[serde(default = "ModelConfig::default_endpoint")]
    pub endpoint: String,
    /// Model name sent with each request
    #[serde(default = "ModelConfig::default_model")]
    pub model: String,
    /// Bearer token (usually supplied through the environment)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Temperature for generation
    #[serde(default = "ModelConfig::default_temperature")]
    pub temperature: f32,
    /// Maximum tokens to generate
    #[serde(default = "ModelConfig::default_max_tokens")]
    pub max_tokens: u32,
    /// Timeout for a single HTTP attempt
    #[serde(default = "ModelConfig::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Retries after the first attempt, for transient failures only
    #[serde(default = "ModelConfig::default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubled on every retry
    #[serde(default = "ModelConfig::default_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for any backoff delay
    #[serde(default = "ModelConfig::default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            model: Self::default_model(),
            api_key: None,
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            timeout: Self::default_timeout(),
            max_retries: Self::default_max_retries(),
            initial_backoff: Self::default_backoff(),
            max_backoff: Self::default_max_backoff(),
        }
    }
}

impl ModelConfig {
    fn default_endpoint() -> String {
        "https://api.groq.com/openai/v1/chat/completions".to_string()
    }

    fn default_model() -> String {
        "llama-3.3-70b-versatile".to_string()
    }

    fn default_temperature() -> f32 {
        0.3
    }

    fn default_max_tokens() -> u32 {
        800
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_max_retries() -> u32 {
        2
    }

    fn default_backoff() -> Duration {
        Duration::from_millis(500)
    }

    fn default_max_backoff() -> Duration {
        Duration::from_secs(8)
    }

    /// Parsed endpoint URL
    pub fn endpoint_url(&self) -> LlmResult<url::Url> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| LlmError::ConfigError(format!("Invalid endpoint '{}': {}", self.endpoint, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(LlmError::ConfigError(format!(
                "Unsupported endpoint scheme: {}",
                other
            ))),
        }
    }

    /// API key, required before any client is built
    pub fn api_key(&self) -> LlmResult<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)
    }

    /// Check the settings that cannot be caught by deserialization
    pub fn validate(&self) -> LlmResult<()> {
        self.endpoint_url()?;
        if self.model.trim().is_empty() {
            return Err(LlmError::ConfigError("Model name is empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::ConfigError(format!(
                "Temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.timeout.is_zero() {
            return Err(LlmError::ConfigError("Timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
