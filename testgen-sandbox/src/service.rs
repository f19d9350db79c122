//! Sandbox service - main entry point

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::execution::ExecutionId;
use crate::runtime::Runtime;
use crate::types::{ExecutionOutcome, ExecutionRequest};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Sandbox execution service with a bounded pool of execution slots
#[derive(Clone)]
pub struct SandboxService {
    runtime: Arc<dyn Runtime>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    queue_timeout: Duration,
}

impl SandboxService {
    /// Create a new sandbox service with the given runtime
    pub fn new(runtime: impl Runtime + 'static, max_concurrent: usize, queue_timeout: Duration) -> Self {
        Self::from_arc(Arc::new(runtime), max_concurrent, queue_timeout)
    }

    /// Pool sized from the sandbox configuration
    pub fn with_config(runtime: impl Runtime + 'static, config: &SandboxConfig) -> Self {
        Self::new(runtime, config.max_concurrent, config.queue_timeout)
    }

    pub fn from_arc(runtime: Arc<dyn Runtime>, max_concurrent: usize, queue_timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            runtime,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queue_timeout,
        }
    }

    /// Run tests, waiting up to the queue timeout for a free slot
    pub async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let id = ExecutionId::new();
        let queued_at = Instant::now();

        let _permit = match tokio::time::timeout(self.queue_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(SandboxError::Closed),
            Err(_) => {
                tracing::warn!(
                    execution_id = %id,
                    waited_ms = queued_at.elapsed().as_millis() as u64,
                    max_concurrent = self.max_concurrent,
                    "Rejecting execution, sandbox is saturated"
                );
                return Err(SandboxError::Busy {
                    waited: self.queue_timeout,
                });
            }
        };

        tracing::info!(
            execution_id = %id,
            runtime = self.runtime.name(),
            source_len = request.source_code.len(),
            test_len = request.test_code.len(),
            queued_ms = queued_at.elapsed().as_millis() as u64,
            "Executing tests"
        );

        let outcome = self.runtime.execute(request).await;

        match &outcome {
            Ok(outcome) => tracing::info!(
                execution_id = %id,
                exit_code = outcome.exit_code,
                timed_out = outcome.timed_out,
                truncated = outcome.truncated,
                duration_ms = outcome.duration_ms,
                "Execution finished"
            ),
            Err(e) => tracing::error!(execution_id = %id, error = %e, "Execution failed to run"),
        }

        outcome
    }

    /// Slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Refuse new executions; running ones finish normally
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }
}
