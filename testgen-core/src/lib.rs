//! # testgen core
//!
//! The pipeline behind the `generate-tests` and `run-tests` entry points:
//! source analysis, test extraction from model output, result normalization
//! and the [`TestOrchestrator`] sequencing them around a model client and a
//! sandbox.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod orchestrator;

pub use analyzer::{analyze, ClassInfo, FunctionInfo, SourceSummary};
pub use config::{AppConfig, OrchestratorConfig, ServerConfig};
pub use error::{ConfigError, OrchestratorError, Stage};
pub use extractor::{extract, Extraction, GeneratedArtifact, NotFoundReason};
pub use normalizer::{normalize, NormalizeContext, TestResult, STDERR_SEPARATOR};
pub use orchestrator::{
    GenerateResponse, GenerationRequest, Lifecycle, Phase, RunRequest, RunResponse, TestOrchestrator,
};
