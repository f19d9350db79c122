//! Orchestrator pipeline tests over a mocked model and real or scripted sandboxes

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use futures::future::join_all;
use testgen_core::{GenerationRequest, OrchestratorConfig, OrchestratorError, RunRequest, Stage};
use testgen_sandbox::{ProcessRuntime, SandboxService, TIMEOUT_EXIT_CODE};
use testgen_tests::common::{
    mock_model, model_client, orchestrator_with, outcome, setup_test_logging, sh_sandbox_config,
    ScriptedRuntime,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sh_orchestrator(model: &MockServer) -> testgen_core::TestOrchestrator {
    sh_orchestrator_with(model, OrchestratorConfig::default())
}

fn sh_orchestrator_with(
    model: &MockServer,
    orchestrator: OrchestratorConfig,
) -> testgen_core::TestOrchestrator {
    let config = sh_sandbox_config();
    let runtime = ProcessRuntime::new(config.clone()).expect("valid sandbox config");
    testgen_core::TestOrchestrator::new(
        model_client(model),
        SandboxService::with_config(runtime, &config),
        orchestrator,
    )
}

#[tokio::test]
async fn test_generated_tests_match_what_the_sandbox_runs() {
    setup_test_logging();
    let model = mock_model(
        "```python\nfrom solution import is_even\n\ndef test_even():\n    assert is_even(4)\n```",
    )
    .await;
    let runtime = Arc::new(ScriptedRuntime::new(outcome(0, "1 passed\n", "")));
    let orchestrator = orchestrator_with(
        model_client(&model),
        runtime.clone(),
        OrchestratorConfig::default(),
    );

    let response = orchestrator
        .generate_tests(GenerationRequest::new(
            "def is_even(n):\n    return n % 2 == 0\n",
            "checks whether a number is even",
            true,
        ))
        .await
        .unwrap();

    let results = response.test_results.expect("tests were run");
    assert!(results.success);
    assert_eq!(results.exit_code, 0);
    assert!(results.hints.is_empty());
    assert_eq!(runtime.calls(), 1);
    assert_eq!(runtime.last_request().unwrap().test_code, response.tests);
}

#[tokio::test]
async fn test_empty_input_never_reaches_the_model() {
    setup_test_logging();
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&model)
        .await;
    let runtime = Arc::new(ScriptedRuntime::new(outcome(0, "", "")));
    let orchestrator = orchestrator_with(
        model_client(&model),
        runtime.clone(),
        OrchestratorConfig::default(),
    );

    let err = orchestrator
        .generate_tests(GenerationRequest::new("", "adds numbers", true))
        .await
        .unwrap_err();
    assert_matches!(err, OrchestratorError::Validation(_));
    assert_eq!(err.stage(), Stage::Validation);

    let err = orchestrator
        .run_tests(RunRequest::new("x = 1", "   \n"))
        .await
        .unwrap_err();
    assert_matches!(err, OrchestratorError::Validation(_));
    assert_eq!(runtime.calls(), 0);
}

#[tokio::test]
async fn test_real_sandbox_pass_and_fail() {
    setup_test_logging();
    let model = mock_model("unused").await;
    let orchestrator = sh_orchestrator(&model);

    let passing = orchestrator
        .run_tests(RunRequest::new(
            "greeting=hello\n",
            ". ./solution.sh\n[ \"$greeting\" = hello ] && echo passed\n",
        ))
        .await
        .unwrap();
    assert!(passing.test_results.success);
    assert_eq!(passing.test_results.output, "passed\n");

    let failing = orchestrator
        .run_tests(RunRequest::new(
            "greeting=bye\n",
            ". ./solution.sh\n[ \"$greeting\" = hello ] || { echo mismatch >&2; exit 1; }\n",
        ))
        .await
        .unwrap();
    assert!(!failing.test_results.success);
    assert_eq!(failing.test_results.exit_code, 1);
    assert!(failing.test_results.output.contains("mismatch"));
}

#[tokio::test]
async fn test_infinite_loop_is_killed_and_reported() {
    setup_test_logging();
    let model = mock_model("unused").await;
    let orchestrator = sh_orchestrator(&model);

    let started = Instant::now();
    let response = orchestrator
        .run_tests(
            RunRequest::new("", "echo started\nwhile :; do :; done\n")
                .with_timeout(Duration::from_millis(500)),
        )
        .await
        .unwrap();

    let results = response.test_results;
    assert!(results.timed_out);
    assert!(!results.success);
    assert_eq!(results.exit_code, TIMEOUT_EXIT_CODE);
    assert!(results.output.contains("started"));
    assert!(results.note.as_deref().unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_workspaces() {
    setup_test_logging();
    let model = mock_model("unused").await;
    let orchestrator = sh_orchestrator(&model);

    let runs = (0..4).map(|i| {
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .run_tests(RunRequest::new(
                    format!("value={}\n", i),
                    "ls > listing\n. ./solution.sh\necho \"$value $(cat listing | wc -l)\"\n",
                ))
                .await
                .unwrap()
        }
    });
    let responses = join_all(runs).await;

    for (i, response) in responses.into_iter().enumerate() {
        let results = response.test_results;
        assert!(results.success);
        let mut fields = results.output.split_whitespace();
        assert_eq!(fields.next(), Some(i.to_string().as_str()));
        // solution.sh, test.sh and the listing itself
        assert_eq!(fields.next(), Some("3"));
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_request_deadline_kills_the_running_sandbox() {
    use testgen_tests::common::process_alive;

    setup_test_logging();
    let model = mock_model("unused").await;
    let orchestrator = sh_orchestrator_with(
        &model,
        OrchestratorConfig {
            request_timeout: Duration::from_millis(300),
            ..OrchestratorConfig::default()
        },
    );
    let host = tempfile::tempdir().unwrap();
    let pidfile = host.path().join("sleeper.pid");

    let started = Instant::now();
    let err = orchestrator
        .run_tests(RunRequest::new(
            "",
            format!(
                "sleep 60 &\necho $! > {}\nwhile :; do :; done\n",
                pidfile.display()
            ),
        ))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        OrchestratorError::Timeout {
            stage: Stage::Execution,
            ..
        }
    );
    // Well before the sandbox's own 5s budget.
    assert!(started.elapsed() < Duration::from_secs(3));

    let pid: u32 = std::fs::read_to_string(&pidfile)
        .expect("test wrote its pid")
        .trim()
        .parse()
        .expect("numeric pid");
    let mut alive = true;
    for _ in 0..40 {
        if !process_alive(pid) {
            alive = false;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!alive, "background process {} outlived the request", pid);
}
