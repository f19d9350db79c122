//! # testgen LLM integration
//!
//! Prompt construction and the generative model client used by the test
//! generation pipeline:
//! - deterministic, fence-delimited prompts
//! - OpenAI-compatible chat completions with timeout and bounded retries

pub mod client;
pub mod config;
pub mod error;
pub mod prompt;

pub use client::{ChatCompletionsClient, ModelClient};
pub use config::ModelConfig;
pub use error::{GenerationError, LlmError, LlmResult};
pub use prompt::{build_prompt, ModelPrompt, PromptBuilder, SOLUTION_MODULE};
