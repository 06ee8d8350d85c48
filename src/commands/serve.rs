use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::server;
use crate::supervisor::Supervisor;

/// Serves the HTTP API until Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let addr = config.server.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        workspace = %config.workspace.root.display(),
        results = %config.results.dir.display(),
        "starting healer server"
    );

    let supervisor = Supervisor::from_config(config);
    server::serve(listener, supervisor, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    })
    .await
}
