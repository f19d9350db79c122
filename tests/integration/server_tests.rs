//! HTTP API tests against a mocked model endpoint

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use testgen_core::OrchestratorConfig;
use testgen_tests::common::{
    completion, mock_model, model_client, orchestrator_with, outcome, setup_test_logging,
    ScriptedRuntime, TestServer, CHAT_PATH,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL_REPLY: &str = "Here are the tests:\n\n```python\nfrom solution import add\n\n\
def test_add():\n    assert add(2, 3) == 5\n```\n";

async fn post(server: &TestServer, route: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(server.url(route))
        .json(&body)
        .send()
        .await
        .expect("request failed");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("JSON body"))
}

#[tokio::test]
async fn test_generate_only_returns_tests_without_results() {
    setup_test_logging();
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("def add(a, b)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(MODEL_REPLY)))
        .expect(1)
        .mount(&model)
        .await;

    let runtime = Arc::new(ScriptedRuntime::new(outcome(0, "1 passed", "")));
    let server = TestServer::start(orchestrator_with(
        model_client(&model),
        runtime.clone(),
        OrchestratorConfig::default(),
    ))
    .await;

    let (status, body) = post(
        &server,
        "/api/generate-tests",
        json!({
            "code": "def add(a, b):\n    return a + b\n",
            "useCase": "adds two numbers",
            "runAfterGenerate": false
        }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["message"], "Tests generated successfully");
    let tests = body["tests"].as_str().unwrap();
    assert!(tests.starts_with("import pytest\n"));
    assert!(tests.contains("def test_add():"));
    assert!(!tests.contains("```"));
    assert!(body.get("testResults").is_none());
    assert_eq!(runtime.calls(), 0);
}

#[tokio::test]
async fn test_generate_and_run_reports_results() {
    setup_test_logging();
    let model = mock_model(MODEL_REPLY).await;
    let runtime = Arc::new(ScriptedRuntime::new(outcome(0, "1 passed in 0.01s\n", "")));
    let server = TestServer::start(orchestrator_with(
        model_client(&model),
        runtime.clone(),
        OrchestratorConfig::default(),
    ))
    .await;

    let (status, body) = post(
        &server,
        "/api/generate-tests",
        json!({
            "sourceCode": "def add(a, b):\n    return a + b\n",
            "useCase": "adds two numbers",
            "runAfterGenerate": true
        }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["message"], "Tests generated and executed");
    assert_eq!(body["testResults"]["success"], true);
    assert_eq!(body["testResults"]["exitCode"], 0);
    assert_eq!(body["testResults"]["timedOut"], false);

    let executed = runtime.last_request().expect("sandbox was called");
    assert_eq!(executed.source_code, "def add(a, b):\n    return a + b\n");
    assert_eq!(executed.test_code, body["tests"].as_str().unwrap());
}

#[tokio::test]
async fn test_model_server_errors_are_502_after_retries() {
    setup_test_logging();
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(3)
        .mount(&model)
        .await;

    let runtime = Arc::new(ScriptedRuntime::new(outcome(0, "", "")));
    let server = TestServer::start(orchestrator_with(
        model_client(&model),
        runtime.clone(),
        OrchestratorConfig::default(),
    ))
    .await;

    let (status, body) = post(
        &server,
        "/api/generate-tests",
        json!({"code": "x = 1", "useCase": "sets x"}),
    )
    .await;

    assert_eq!(status, 502);
    assert_eq!(body["stage"], "generation");
    assert_eq!(runtime.calls(), 0);
}

#[tokio::test]
async fn test_slow_model_hits_request_deadline() {
    setup_test_logging();
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(MODEL_REPLY))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&model)
        .await;

    let server = TestServer::start(orchestrator_with(
        model_client(&model),
        Arc::new(ScriptedRuntime::new(outcome(0, "", ""))),
        OrchestratorConfig {
            request_timeout: Duration::from_millis(300),
            ..OrchestratorConfig::default()
        },
    ))
    .await;

    let (status, body) = post(
        &server,
        "/api/generate-tests",
        json!({"code": "x = 1", "useCase": "sets x"}),
    )
    .await;

    assert_eq!(status, 504);
    assert_eq!(body["stage"], "generation");
}

#[tokio::test]
async fn test_prose_reply_is_422() {
    setup_test_logging();
    let model = mock_model("I'm sorry, but I cannot help with writing tests for this code.").await;
    let server = TestServer::start(orchestrator_with(
        model_client(&model),
        Arc::new(ScriptedRuntime::new(outcome(0, "", ""))),
        OrchestratorConfig::default(),
    ))
    .await;

    let (status, body) = post(
        &server,
        "/api/generate-tests",
        json!({"code": "x = 1", "useCase": "sets x", "runAfterGenerate": true}),
    )
    .await;

    assert_eq!(status, 422);
    assert_eq!(body["stage"], "extraction");
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_tests_reports_failures_as_success_response() {
    setup_test_logging();
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(MODEL_REPLY)))
        .expect(0)
        .mount(&model)
        .await;

    let failing = outcome(
        1,
        "E       assert 1 == 2\nFAILED test_solution.py::test_x - assert 1 == 2\n1 failed\n",
        "",
    );
    let server = TestServer::start(orchestrator_with(
        model_client(&model),
        Arc::new(ScriptedRuntime::new(failing)),
        OrchestratorConfig::default(),
    ))
    .await;

    let (status, body) = post(
        &server,
        "/api/run-tests",
        json!({"code": "x = 1", "tests": "def test_x():\n    assert 1 == 2\n"}),
    )
    .await;

    assert_eq!(status, 200);
    let results = &body["testResults"];
    assert_eq!(results["success"], false);
    assert_eq!(results["exitCode"], 1);
    assert!(results["output"].as_str().unwrap().contains("1 failed"));
    assert!(!results["hints"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_saturated_sandbox_is_503() {
    setup_test_logging();
    let model = mock_model(MODEL_REPLY).await;
    let runtime = Arc::new(
        ScriptedRuntime::new(outcome(0, "ok", "")).with_delay(Duration::from_millis(1500)),
    );
    let orchestrator = testgen_core::TestOrchestrator::new(
        model_client(&model),
        testgen_sandbox::SandboxService::from_arc(runtime, 1, Duration::from_millis(100)),
        OrchestratorConfig::default(),
    );
    let server = TestServer::start(orchestrator).await;

    let body = json!({"code": "x = 1", "tests": "true"});
    let (first, second) = tokio::join!(post(&server, "/api/run-tests", body.clone()), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        post(&server, "/api/run-tests", body.clone()).await
    });

    assert_eq!(first.0, 200);
    assert_eq!(second.0, 503);
    assert_eq!(second.1["stage"], "execution");
}
