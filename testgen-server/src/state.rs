//! Shared server state

use testgen_core::TestOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: TestOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: TestOrchestrator) -> Self {
        Self { orchestrator }
    }
}
