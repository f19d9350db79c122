//! Faults of the execution environment itself
//!
//! A failing test is never an error here: it is an [`crate::ExecutionOutcome`]
//! with `success() == false`.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare sandbox workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error("failed to start sandboxed process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to await sandboxed process: {0}")]
    Wait(#[source] io::Error),

    #[error("sandbox is busy: no execution slot freed up within {waited:?}")]
    Busy { waited: Duration },

    #[error("sandbox is shutting down")]
    Closed,

    #[error("invalid sandbox configuration: {0}")]
    Config(String),
}

impl SandboxError {
    /// Backpressure rejection rather than a broken environment
    pub fn is_busy(&self) -> bool {
        matches!(self, SandboxError::Busy { .. })
    }
}
