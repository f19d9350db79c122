//! Test generation and execution pipeline
//!
//! A request moves through
//! `Idle -> Prompting -> Generating -> Extracting -> [Executing -> Normalizing] -> Done`
//! and can fail from any non-terminal phase. The run-only entry point starts
//! at `Executing`. The whole pipeline runs under one request deadline; when it
//! expires the in-flight model call or sandbox process is dropped and the
//! phase that was active is reported.

use crate::analyzer::{analyze, SourceSummary};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Stage};
use crate::extractor::{GeneratedArtifact, NotFoundReason};
use crate::normalizer::{normalize, NormalizeContext, TestResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use testgen_llm::{ModelClient, PromptBuilder, SOLUTION_MODULE};
use testgen_sandbox::{ExecutionRequest, SandboxService};
use tracing::Instrument;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Lifecycle phase of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Prompting,
    Generating,
    Extracting,
    Executing,
    Normalizing,
    Done,
    Failed(Stage),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed(_))
    }

    /// Stage charged with a failure that happens in this phase
    pub fn stage(&self) -> Stage {
        match self {
            Phase::Idle => Stage::Validation,
            Phase::Prompting => Stage::Prompting,
            Phase::Generating => Stage::Generation,
            Phase::Extracting => Stage::Extraction,
            Phase::Executing => Stage::Execution,
            Phase::Normalizing => Stage::Normalization,
            Phase::Failed(stage) => *stage,
            Phase::Done => Stage::Normalization,
        }
    }

    fn can_advance_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Idle, Prompting) | (Idle, Executing) => true,
            (Prompting, Generating) => true,
            (Generating, Extracting) => true,
            (Extracting, Executing) | (Extracting, Done) => true,
            (Executing, Normalizing) => true,
            (Normalizing, Done) => true,
            _ => false,
        }
    }
}

/// Phase tracker for a single request
#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(from = ?self.phase, to = ?next, "Pipeline transition");
        self.phase = next;
    }

    pub fn fail(&mut self, stage: Stage) {
        self.advance(Phase::Failed(stage));
    }
}

/// Input of the generate-tests entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    source_code: String,
    use_case: String,
    run_after_generate: bool,
}

impl GenerationRequest {
    pub fn new(source_code: impl Into<String>, use_case: impl Into<String>, run_after_generate: bool) -> Self {
        Self {
            source_code: source_code.into(),
            use_case: use_case.into(),
            run_after_generate,
        }
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn use_case(&self) -> &str {
        &self.use_case
    }

    pub fn run_after_generate(&self) -> bool {
        self.run_after_generate
    }

    fn validate(&self) -> Result<()> {
        if self.source_code.trim().is_empty() || self.use_case.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "Code and use case are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input of the run-tests entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    source_code: String,
    test_code: String,
    timeout: Option<Duration>,
}

impl RunRequest {
    pub fn new(source_code: impl Into<String>, test_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            test_code: test_code.into(),
            timeout: None,
        }
    }

    /// Sandbox wall-clock budget; clamped by the sandbox configuration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn test_code(&self) -> &str {
        &self.test_code
    }

    fn validate(&self) -> Result<()> {
        if self.source_code.trim().is_empty() || self.test_code.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "Code and tests are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Successful generate-tests response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub tests: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestResult>,
}

/// Successful run-tests response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub test_results: TestResult,
}

const GENERATED_MESSAGE: &str = "Tests generated successfully";
const GENERATED_AND_RUN_MESSAGE: &str = "Tests generated and executed";

/// Drives prompt construction, generation, extraction, execution and
/// normalization for each request
#[derive(Clone)]
pub struct TestOrchestrator {
    model: Arc<dyn ModelClient>,
    sandbox: SandboxService,
    config: OrchestratorConfig,
    module: String,
}

impl TestOrchestrator {
    pub fn new(model: Arc<dyn ModelClient>, sandbox: SandboxService, config: OrchestratorConfig) -> Self {
        Self {
            model,
            sandbox,
            config,
            module: SOLUTION_MODULE.to_string(),
        }
    }

    /// Module name the sandbox saves the submitted source under
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn sandbox(&self) -> &SandboxService {
        &self.sandbox
    }

    /// Generate tests for `request`, running them when it asks for that
    pub async fn generate_tests(&self, request: GenerationRequest) -> Result<GenerateResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "generate_tests",
            %request_id,
            model = self.model.name(),
            run_after_generate = request.run_after_generate()
        );

        async move {
            let mut lifecycle = Lifecycle::new();
            let outcome = tokio::time::timeout(
                self.config.request_timeout,
                self.generation_pipeline(&request, &mut lifecycle),
            )
            .await;
            self.finish(outcome, &mut lifecycle)
        }
        .instrument(span)
        .await
    }

    /// Run caller-supplied tests against caller-supplied code
    pub async fn run_tests(&self, request: RunRequest) -> Result<RunResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("run_tests", %request_id);

        async move {
            let mut lifecycle = Lifecycle::new();
            let outcome = tokio::time::timeout(
                self.config.request_timeout,
                self.run_pipeline(&request, &mut lifecycle),
            )
            .await;
            self.finish(outcome, &mut lifecycle)
        }
        .instrument(span)
        .await
    }

    fn finish<T>(
        &self,
        outcome: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
        lifecycle: &mut Lifecycle,
    ) -> Result<T> {
        let result = outcome.unwrap_or_else(|_| {
            Err(OrchestratorError::Timeout {
                stage: lifecycle.phase().stage(),
                after: self.config.request_timeout,
            })
        });

        match &result {
            Ok(_) => tracing::info!("Request completed"),
            Err(e) => {
                lifecycle.fail(e.stage());
                match e {
                    OrchestratorError::Validation(_) => {
                        tracing::info!(stage = %e.stage(), error = %e, "Request rejected")
                    }
                    _ => tracing::warn!(stage = %e.stage(), error = %e, "Request failed"),
                }
            }
        }
        result
    }

    async fn generation_pipeline(
        &self,
        request: &GenerationRequest,
        lifecycle: &mut Lifecycle,
    ) -> Result<GenerateResponse> {
        request.validate()?;
        lifecycle.advance(Phase::Prompting);

        let summary = analyze(request.source_code());
        let prompt = PromptBuilder::new()
            .with_public_api(summary.public_signatures())
            .build(request.source_code(), request.use_case(), request.run_after_generate());

        lifecycle.advance(Phase::Generating);
        let raw = self
            .model
            .generate(&prompt)
            .await
            .map_err(OrchestratorError::Generation)?;

        lifecycle.advance(Phase::Extracting);
        let (artifact, not_found) = GeneratedArtifact::from_model_output(raw);
        let tests = match (artifact.extracted_test_code, not_found) {
            (Some(tests), _) => tests,
            (None, reason) => {
                tracing::debug!(raw_len = artifact.raw_model_output.len(), "No test code in model output");
                return Err(OrchestratorError::Extraction(
                    reason.unwrap_or(NotFoundReason::Empty),
                ));
            }
        };
        tracing::debug!(tests_len = tests.len(), "Extracted test code");

        if !request.run_after_generate() {
            lifecycle.advance(Phase::Done);
            return Ok(GenerateResponse {
                tests,
                message: GENERATED_MESSAGE.to_string(),
                test_results: None,
            });
        }

        lifecycle.advance(Phase::Executing);
        let execution = ExecutionRequest::new(request.source_code(), tests.clone());
        let test_results = self.execute(execution, &summary, lifecycle).await?;

        Ok(GenerateResponse {
            tests,
            message: GENERATED_AND_RUN_MESSAGE.to_string(),
            test_results: Some(test_results),
        })
    }

    async fn run_pipeline(&self, request: &RunRequest, lifecycle: &mut Lifecycle) -> Result<RunResponse> {
        request.validate()?;
        lifecycle.advance(Phase::Executing);

        let summary = analyze(request.source_code());
        let mut execution = ExecutionRequest::new(request.source_code(), request.test_code());
        if let Some(timeout) = request.timeout {
            execution = execution.with_timeout(timeout);
        }
        let test_results = self.execute(execution, &summary, lifecycle).await?;
        Ok(RunResponse { test_results })
    }

    /// `Executing -> Normalizing -> Done`
    async fn execute(
        &self,
        execution: ExecutionRequest,
        summary: &SourceSummary,
        lifecycle: &mut Lifecycle,
    ) -> Result<TestResult> {
        let outcome = self
            .sandbox
            .run(execution)
            .await
            .map_err(OrchestratorError::Sandbox)?;

        lifecycle.advance(Phase::Normalizing);
        let context = NormalizeContext {
            module: &self.module,
            summary: Some(summary),
            stub_hints: self.config.stub_hints,
        };
        let result = normalize(&outcome, &context);
        tracing::info!(
            success = result.success,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            hints = result.hints.len(),
            "Tests executed"
        );

        lifecycle.advance(Phase::Done);
        Ok(result)
    }
}
