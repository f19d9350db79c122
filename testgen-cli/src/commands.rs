use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use testgen_core::{AppConfig, GenerationRequest, RunRequest, TestOrchestrator, TestResult};
use testgen_llm::{ChatCompletionsClient, GenerationError, ModelClient, ModelPrompt};
use testgen_sandbox::{ProcessRuntime, SandboxService};
use testgen_server::AppState;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Model stand-in for commands that never reach the generation stage
struct NoModel;

#[async_trait]
impl ModelClient for NoModel {
    async fn generate(&self, _prompt: &ModelPrompt) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable {
            attempts: 0,
            detail: "no model client configured".to_string(),
        })
    }

    fn name(&self) -> &str {
        "none"
    }
}

fn build_orchestrator(config: &AppConfig, model: Arc<dyn ModelClient>) -> Result<TestOrchestrator> {
    let runtime =
        ProcessRuntime::new(config.sandbox.clone()).context("Invalid sandbox configuration")?;
    let sandbox = SandboxService::with_config(runtime, &config.sandbox);
    Ok(
        TestOrchestrator::new(model, sandbox, config.orchestrator.clone())
            .with_module(config.sandbox.source_module()),
    )
}

fn model_client(config: &AppConfig) -> Result<Arc<dyn ModelClient>> {
    let client = ChatCompletionsClient::new(config.model.clone())
        .context("Failed to create model client")?;
    Ok(Arc::new(client))
}

async fn read_input(path: &Path, what: &str) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let orchestrator = build_orchestrator(&config, model_client(&config)?)?;
    info!(
        model = %config.model.model,
        network = %config.sandbox.network,
        filesystem = %config.sandbox.filesystem,
        max_concurrent = config.sandbox.max_concurrent,
        "Starting testgen v{}",
        env!("CARGO_PKG_VERSION")
    );

    let bind_addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal_token.cancel();
    });

    testgen_server::start_server(listener, AppState::new(orchestrator), shutdown).await
}

/// Returns whether the tests (if run) passed
pub async fn generate(
    config: AppConfig,
    code: &Path,
    use_case: String,
    run: bool,
    output: Option<&Path>,
    json: bool,
) -> Result<bool> {
    let orchestrator = build_orchestrator(&config, model_client(&config)?)?;
    let source = read_input(code, "source code").await?;

    let response = orchestrator
        .generate_tests(GenerationRequest::new(source, use_case, run))
        .await
        .context("Test generation failed")?;

    if let Some(path) = output {
        tokio::fs::write(path, format!("{}\n", response.tests))
            .await
            .with_context(|| format!("Failed to write tests to {}", path.display()))?;
        info!("Tests written to {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        if output.is_none() {
            println!("{}", response.tests);
        }
        if let Some(results) = &response.test_results {
            print_results(results);
        }
    }

    Ok(response.test_results.map_or(true, |r| r.success))
}

/// Returns whether the tests passed
pub async fn run(
    config: AppConfig,
    code: &Path,
    tests: &Path,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<bool> {
    let orchestrator = build_orchestrator(&config, Arc::new(NoModel))?;
    let source = read_input(code, "source code").await?;
    let test_code = read_input(tests, "tests").await?;

    let mut request = RunRequest::new(source, test_code);
    if let Some(ms) = timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    let response = orchestrator
        .run_tests(request)
        .await
        .context("Test run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_results(&response.test_results);
    }
    Ok(response.test_results.success)
}

fn print_results(results: &TestResult) {
    eprintln!();
    eprintln!("{}", results.output.trim_end());
    eprintln!();
    let verdict = if results.success { "PASSED" } else { "FAILED" };
    eprintln!(
        "{} (exit code {}, {} ms)",
        verdict, results.exit_code, results.duration_ms
    );
    if let Some(note) = &results.note {
        eprintln!("Note: {}", note);
    }
    for hint in &results.hints {
        eprintln!("Hint: {}", hint);
    }
}
