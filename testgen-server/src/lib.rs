//! testgen HTTP API
//!
//! - `POST /api/generate-tests`: generate (and optionally run) tests
//! - `POST /api/run-tests`: run existing tests against code
//! - `GET /api/health`

pub mod error;
pub mod routes;
pub mod state;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

/// Serve the API on `listener` until `shutdown` is cancelled
pub async fn start_server(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = create_router(state);

    let bind_addr = listener
        .local_addr()
        .context("Failed to obtain server bind address")?;
    info!("Starting testgen API on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("testgen API server error")?;

    info!("testgen API stopped");
    Ok(())
}
