//! Common test utilities shared across integration and E2E tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use testgen_core::{OrchestratorConfig, TestOrchestrator};
use testgen_llm::{ChatCompletionsClient, ModelConfig};
use testgen_sandbox::{
    ExecutionOutcome, ExecutionRequest, FilesystemPolicy, NetworkPolicy, Runtime, SandboxConfig,
    SandboxService,
};
use testgen_server::AppState;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHAT_PATH: &str = "/openai/v1/chat/completions";

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Chat completion body with a single choice
pub fn completion(text: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
}

/// Mock model endpoint answering every call with `reply`
pub async fn mock_model(reply: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(reply)))
        .mount(&server)
        .await;
    server
}

pub fn model_config(server: &MockServer) -> ModelConfig {
    ModelConfig {
        endpoint: format!("{}{}", server.uri(), CHAT_PATH),
        api_key: Some("test-key".to_string()),
        timeout: Duration::from_secs(2),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        ..ModelConfig::default()
    }
}

pub fn model_client(server: &MockServer) -> Arc<ChatCompletionsClient> {
    Arc::new(ChatCompletionsClient::new(model_config(server)).expect("valid model config"))
}

pub fn outcome(exit_code: i32, stdout: &str, stderr: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        timed_out: false,
        truncated: false,
        duration_ms: 5,
    }
}

/// Runtime returning a fixed outcome and recording what it was asked to run
pub struct ScriptedRuntime {
    outcome: ExecutionOutcome,
    delay: Duration,
    calls: AtomicUsize,
    last_request: std::sync::Mutex<Option<ExecutionRequest>>,
}

impl ScriptedRuntime {
    pub fn new(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_request: std::sync::Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ExecutionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    async fn execute(&self, request: ExecutionRequest) -> testgen_sandbox::Result<ExecutionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        tokio::time::sleep(self.delay).await;
        Ok(self.outcome.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// `sh`-driven sandbox config: source in `solution.sh`, tests in `test.sh`
pub fn sh_sandbox_config() -> SandboxConfig {
    SandboxConfig {
        command: vec!["sh".into(), "{test_file}".into()],
        source_file: "solution.sh".into(),
        test_file: "test.sh".into(),
        expose_solution_globals: false,
        network: NetworkPolicy::Inherit,
        filesystem: FilesystemPolicy::Inherit,
        timeout: Duration::from_secs(5),
        ..SandboxConfig::default()
    }
}

pub fn orchestrator_with(
    model: Arc<dyn testgen_llm::ModelClient>,
    runtime: Arc<dyn Runtime>,
    config: OrchestratorConfig,
) -> TestOrchestrator {
    TestOrchestrator::new(
        model,
        SandboxService::from_arc(runtime, 2, Duration::from_secs(1)),
        config,
    )
}

/// API server on an ephemeral port, stopped on drop
pub struct TestServer {
    pub base_url: String,
    shutdown: CancellationToken,
}

impl TestServer {
    pub async fn start(orchestrator: TestOrchestrator) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(testgen_server::start_server(
            listener,
            AppState::new(orchestrator),
            shutdown.clone(),
        ));
        Self { base_url, shutdown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Whether a process is still running (zombies count as gone)
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}
