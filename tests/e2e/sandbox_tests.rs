//! End-to-end sandbox runs with real interpreters
//!
//! The pytest tests are skipped when `python3` with pytest is not installed.

use std::process::Command;
use std::time::Duration;

use testgen_core::{analyze, normalize, NormalizeContext};
use testgen_llm::SOLUTION_MODULE;
use testgen_sandbox::{
    ExecutionRequest, FilesystemPolicy, NetworkPolicy, ProcessRuntime, SandboxConfig, SandboxError,
    SandboxService,
};
use testgen_tests::common::{setup_test_logging, sh_sandbox_config};

fn pytest_available() -> bool {
    Command::new("python3")
        .args(["-c", "import pytest"])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn python_service() -> SandboxService {
    let config = SandboxConfig {
        network: NetworkPolicy::Inherit,
        filesystem: FilesystemPolicy::Inherit,
        timeout: Duration::from_secs(30),
        ..SandboxConfig::default()
    };
    SandboxService::with_config(ProcessRuntime::new(config.clone()).unwrap(), &config)
}

#[tokio::test]
async fn test_pytest_passing_suite() {
    setup_test_logging();
    if !pytest_available() {
        eprintln!("skipping: pytest is not installed");
        return;
    }

    let source = "def add(a, b):\n    return a + b\n";
    let tests = "import pytest\nfrom solution import add\n\n\
                 def test_add():\n    assert add(2, 3) == 5\n\n\
                 def test_negative():\n    assert add(-1, 1) == 0\n";
    let outcome = python_service()
        .run(ExecutionRequest::new(source, tests))
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0, "output: {}{}", outcome.stdout, outcome.stderr);
    assert!(outcome.stdout.contains("2 passed"));
    assert!(!outcome.timed_out);
}

#[tokio::test]
async fn test_pytest_failure_is_explained() {
    setup_test_logging();
    if !pytest_available() {
        eprintln!("skipping: pytest is not installed");
        return;
    }

    let source = "def add(a, b):\n    return a - b\n";
    let tests = "from solution import add\n\ndef test_add():\n    assert add(2, 3) == 5\n";
    let outcome = python_service()
        .run(ExecutionRequest::new(source, tests))
        .await
        .unwrap();

    let summary = analyze(source);
    let result = normalize(
        &outcome,
        &NormalizeContext {
            module: SOLUTION_MODULE,
            summary: Some(&summary),
            stub_hints: false,
        },
    );
    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
    assert!(result.output.contains("1 failed"));
    assert!(result.hints.iter().any(|hint| hint.contains("assertion failed")));
}

#[tokio::test]
async fn test_pytest_sees_solution_names_without_import() {
    setup_test_logging();
    if !pytest_available() {
        eprintln!("skipping: pytest is not installed");
        return;
    }

    let source = "def double(x):\n    return 2 * x\n";
    let tests = "def test_double():\n    assert double(4) == 8\n";
    let outcome = python_service()
        .run(ExecutionRequest::new(source, tests))
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0, "output: {}{}", outcome.stdout, outcome.stderr);
}

#[tokio::test]
async fn test_missing_function_gets_a_hint() {
    setup_test_logging();
    if !pytest_available() {
        eprintln!("skipping: pytest is not installed");
        return;
    }

    let source = "def add(a, b):\n    return a + b\n";
    let tests = "def test_sub():\n    assert subtract(3, 1) == 2\n";
    let outcome = python_service()
        .run(ExecutionRequest::new(source, tests))
        .await
        .unwrap();

    let summary = analyze(source);
    let result = normalize(
        &outcome,
        &NormalizeContext {
            summary: Some(&summary),
            ..NormalizeContext::default()
        },
    );
    assert!(!result.success);
    assert!(result
        .hints
        .iter()
        .any(|hint| hint.starts_with("`subtract` is referenced by the tests")));
}

#[tokio::test]
async fn test_service_runs_with_fresh_environment() {
    setup_test_logging();
    std::env::set_var("TESTGEN_LEAK_CHECK", "secret");
    let config = sh_sandbox_config();
    let service = SandboxService::with_config(ProcessRuntime::new(config.clone()).unwrap(), &config);

    let outcome = service
        .run(ExecutionRequest::new("", "echo \"leak=${TESTGEN_LEAK_CHECK:-none}\"\n"))
        .await
        .unwrap();
    assert_eq!(outcome.stdout, "leak=none\n");
    assert_eq!(service.available_slots(), config.max_concurrent);
}

#[tokio::test]
async fn test_missing_interpreter_is_a_sandbox_fault() {
    setup_test_logging();
    let config = SandboxConfig {
        command: vec!["definitely-not-an-interpreter".into(), "{test_file}".into()],
        network: NetworkPolicy::Inherit,
        filesystem: FilesystemPolicy::Inherit,
        ..SandboxConfig::default()
    };
    let service = SandboxService::with_config(ProcessRuntime::new(config.clone()).unwrap(), &config);

    let err = service
        .run(ExecutionRequest::new("x = 1", "def test_x(): pass"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Spawn { .. }));
    assert_eq!(service.available_slots(), config.max_concurrent);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_leaves_no_survivors() {
    use testgen_tests::common::process_alive;

    setup_test_logging();
    let config = SandboxConfig {
        timeout: Duration::from_millis(500),
        ..sh_sandbox_config()
    };
    let service = SandboxService::with_config(ProcessRuntime::new(config.clone()).unwrap(), &config);

    let outcome = service
        .run(ExecutionRequest::new(
            "",
            "sleep 60 &\necho $!\nwhile :; do :; done\n",
        ))
        .await
        .unwrap();
    assert!(outcome.timed_out);

    let pid: u32 = outcome.stdout.trim().parse().expect("background pid");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!process_alive(pid), "background process {} survived", pid);
}
