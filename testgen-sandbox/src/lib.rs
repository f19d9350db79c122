//! Sandbox - isolated execution of generated tests
//!
//! Runs untrusted test code against submitted source code behind a single
//! capability, [`Runtime::execute`], so the isolation mechanism can be swapped
//! without touching callers. [`SandboxService`] adds bounded concurrency.

mod config;
mod error;
mod execution;
mod limits;
mod output;
mod policy;
mod runtime;
mod service;
mod types;

pub use config::SandboxConfig;
pub use error::SandboxError;
pub use execution::ExecutionId;
pub use limits::ResourceLimits;
pub use output::TRUNCATION_MARKER;
pub use policy::{FilesystemPolicy, NetworkPolicy};
#[cfg(feature = "process")]
pub use runtime::ProcessRuntime;
pub use runtime::Runtime;
pub use service::SandboxService;
pub use types::{ExecutionOutcome, ExecutionRequest, TIMEOUT_EXIT_CODE};

/// Result alias for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
