//! HTTP surface over the run supervisor.

mod error;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::supervisor::Supervisor;

/// How long shutdown waits for cancelled runs to finalize.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shared handler state.
#[derive(Clone)]
pub(crate) struct AppState {
    pub supervisor: Supervisor,
}

impl AppState {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }
}

/// The full application: routes, permissive CORS and state.
pub(crate) fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router().layer(cors).with_state(state)
}

/// Serves the API on `listener` until `shutdown` resolves.
///
/// Once the server stops accepting requests, active runs are cancelled and
/// awaited so that each is finalized and persisted before this returns.
pub(crate) async fn serve<F>(listener: TcpListener, supervisor: Supervisor, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listener.local_addr().context("Failed to read listen address")?;
    info!(addr = %addr, "listening");

    let state = AppState::new(supervisor.clone());
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    let active = supervisor.active_runs();
    if active > 0 {
        info!(active, "cancelling active runs");
    }
    if !supervisor.shutdown(SHUTDOWN_GRACE).await {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "runs still finalizing at shutdown"
        );
    }
    Ok(())
}
