//! Core types for sandbox execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exit code reported when the wall-clock timeout killed the run
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Request to run tests against source code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code under test
    pub source_code: String,

    /// The test code to run against it
    pub test_code: String,

    /// Wall-clock budget (None = the runtime's default)
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, test_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            test_code: test_code.into(),
            timeout: None,
        }
    }

    /// Set the wall-clock timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the wall-clock timeout in milliseconds
    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(timeout_ms))
    }
}

/// Raw result of one execution; produced once, never streamed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// Process exit code; 128 + signal when killed by a signal,
    /// [`TIMEOUT_EXIT_CODE`] on timeout
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    /// Whether the wall-clock timeout expired
    pub timed_out: bool,

    /// Whether either stream hit the capture cap
    pub truncated: bool,

    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    /// Outcome for a run killed at its deadline
    pub fn timed_out(stdout: String, stderr: String, truncated: bool, duration_ms: u64) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout,
            stderr,
            timed_out: true,
            truncated,
            duration_ms,
        }
    }

    /// Check if execution succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}
