//! Pipeline errors, each tagged with the stage that produced it

use crate::extractor::NotFoundReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use testgen_llm::{GenerationError, LlmError};
use testgen_sandbox::SandboxError;
use thiserror::Error;

/// Pipeline stage, as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Validation,
    Prompting,
    Generation,
    Extraction,
    Execution,
    Normalization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::Prompting => "prompting",
            Stage::Generation => "generation",
            Stage::Extraction => "extraction",
            Stage::Execution => "execution",
            Stage::Normalization => "normalization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Validation(String),

    #[error("test generation failed: {0}")]
    Generation(#[source] GenerationError),

    #[error("could not extract test code: {0}")]
    Extraction(NotFoundReason),

    #[error("sandbox fault: {0}")]
    Sandbox(#[source] SandboxError),

    #[error("request timed out during {stage} after {after:?}")]
    Timeout { stage: Stage, after: Duration },
}

impl OrchestratorError {
    /// Stage the request failed in
    pub fn stage(&self) -> Stage {
        match self {
            OrchestratorError::Validation(_) => Stage::Validation,
            OrchestratorError::Generation(_) => Stage::Generation,
            OrchestratorError::Extraction(_) => Stage::Extraction,
            OrchestratorError::Sandbox(_) => Stage::Execution,
            OrchestratorError::Timeout { stage, .. } => *stage,
        }
    }

    /// Model or request deadline exceeded
    pub fn is_timeout(&self) -> bool {
        match self {
            OrchestratorError::Timeout { .. } => true,
            OrchestratorError::Generation(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Sandbox pool saturated
    pub fn is_busy(&self) -> bool {
        matches!(self, OrchestratorError::Sandbox(e) if e.is_busy())
    }

    /// Message safe to show callers; provider and host details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            OrchestratorError::Validation(msg) => msg.clone(),
            OrchestratorError::Generation(e) if e.is_timeout() => {
                "The test generation service did not respond in time. Please try again.".to_string()
            }
            OrchestratorError::Generation(_) => {
                "Test generation failed. Please try again later.".to_string()
            }
            OrchestratorError::Extraction(reason) => format!(
                "The generated response did not contain usable test code ({}). Please generate again.",
                reason
            ),
            OrchestratorError::Sandbox(e) if e.is_busy() => {
                "The test runner is busy. Please retry shortly.".to_string()
            }
            OrchestratorError::Sandbox(_) => "The test runner could not be started.".to_string(),
            OrchestratorError::Timeout { after, .. } => format!(
                "The request did not complete within {} seconds.",
                after.as_secs()
            ),
        }
    }
}

/// Configuration could not be loaded or is invalid
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Env { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Model(#[from] LlmError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}
