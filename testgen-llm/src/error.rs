use std::time::Duration;

use thiserror::Error;

/// Configuration problems detected before any model call is made
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Missing API key: set TESTGEN_API_KEY or GROQ_API_KEY")]
    MissingApiKey,

    #[error("HTTP client error: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Failure of a single generation call after the retry budget is spent
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Every attempt ran past the per-attempt timeout
    #[error("model call timed out after {attempts} attempt(s) of {per_attempt:?}")]
    Timeout { attempts: u32, per_attempt: Duration },

    /// Transient failures (network, 5xx, 429) exhausted the retry budget
    #[error("model service unavailable after {attempts} attempt(s): {detail}")]
    Unavailable { attempts: u32, detail: String },

    /// The provider rejected the credentials
    #[error("model service rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// The provider rejected the request as malformed
    #[error("model service rejected request (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The provider answered 200 with a body we cannot use
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    /// The provider answered with no text
    #[error("empty response from model")]
    EmptyResponse,
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Timeout { .. })
    }
}

/// Outcome of one HTTP attempt, used to drive the retry loop
#[derive(Debug)]
pub(crate) enum AttemptError {
    Transient {
        detail: String,
        timed_out: bool,
        retry_after: Option<Duration>,
    },
    Fatal(GenerationError),
}
