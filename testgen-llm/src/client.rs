//! Generation client for OpenAI-compatible chat completion endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::ModelConfig;
use crate::error::{AttemptError, GenerationError, LlmResult};
use crate::prompt::ModelPrompt;

const DETAIL_PREVIEW_CHARS: usize = 300;

/// Anything that can turn a prompt into raw model text
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send the prompt and return the raw text of the first completion
    async fn generate(&self, prompt: &ModelPrompt) -> Result<String, GenerationError>;

    /// Identifier used in logs
    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client with per-attempt timeout and bounded exponential-backoff retries
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: url::Url,
    api_key: String,
    config: ModelConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: ModelConfig) -> LlmResult<Self> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;
        let api_key = config.api_key()?.to_string();
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            endpoint,
            api_key,
            config,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn attempt(&self, body: &ChatRequest<'_>) -> Result<String, AttemptError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let parsed: ChatResponse = response.json().await.map_err(|e| {
                if e.is_timeout() {
                    transport_error(e)
                } else {
                    AttemptError::Fatal(GenerationError::InvalidResponse(e.to_string()))
                }
            })?;

            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|content| !content.trim().is_empty())
                .ok_or(AttemptError::Fatal(GenerationError::EmptyResponse))?;
            return Ok(content);
        }

        let retry_after = retry_after(response.headers());
        let detail: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(DETAIL_PREVIEW_CHARS)
            .collect();

        match status.as_u16() {
            408 | 429 => Err(AttemptError::Transient {
                detail: format!("HTTP {}: {}", status.as_u16(), detail),
                timed_out: false,
                retry_after,
            }),
            s if s >= 500 => Err(AttemptError::Transient {
                detail: format!("HTTP {}: {}", s, detail),
                timed_out: false,
                retry_after,
            }),
            401 | 403 => Err(AttemptError::Fatal(GenerationError::Unauthorized {
                status: status.as_u16(),
            })),
            s => Err(AttemptError::Fatal(GenerationError::Rejected { status: s, detail })),
        }
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    #[instrument(skip(self, prompt), fields(model = %self.config.model))]
    async fn generate(&self, prompt: &ModelPrompt) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user_payload,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let attempts = self.config.max_retries + 1;
        let mut all_timed_out = true;
        let mut last_detail = String::new();

        for attempt in 1..=attempts {
            debug!(attempt, "Calling model");
            match self.attempt(&body).await {
                Ok(text) => {
                    debug!(attempt, response_len = text.len(), "Model call succeeded");
                    return Ok(text);
                }
                Err(AttemptError::Fatal(err)) => {
                    warn!(attempt, error = %err, "Model call failed permanently");
                    return Err(err);
                }
                Err(AttemptError::Transient {
                    detail,
                    timed_out,
                    retry_after,
                }) => {
                    all_timed_out &= timed_out;
                    warn!(attempt, timed_out, detail = %detail, "Transient model failure");
                    last_detail = detail;

                    if attempt < attempts {
                        let delay = retry_after
                            .map(|d| d.min(self.config.max_backoff))
                            .unwrap_or_else(|| self.config.backoff_for(attempt));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        if all_timed_out {
            Err(GenerationError::Timeout {
                attempts,
                per_attempt: self.config.timeout,
            })
        } else {
            Err(GenerationError::Unavailable {
                attempts,
                detail: last_detail,
            })
        }
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}

fn transport_error(err: reqwest::Error) -> AttemptError {
    AttemptError::Transient {
        timed_out: err.is_timeout(),
        detail: err.to_string(),
        retry_after: None,
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
