//! Runtime trait and implementations

#[cfg(feature = "process")]
mod process;

use crate::types::{ExecutionOutcome, ExecutionRequest};
use crate::Result;
use async_trait::async_trait;

#[cfg(feature = "process")]
pub use process::ProcessRuntime;

/// Runtime abstraction for executing tests against code.
///
/// Implementations report everything that happens inside the sandbox (failing
/// tests, crashes, signals, timeouts) as an [`ExecutionOutcome`]; `Err` is
/// reserved for an environment that could not run the code at all. Dropping
/// the returned future must stop the execution and release its resources.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Execute the request and return its single outcome
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome>;

    /// Get runtime name
    fn name(&self) -> &str;
}
