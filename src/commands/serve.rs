use anyhow::{Context, Result};
use std::net::SocketAddr;

use reelforge::app::AppContext;
use reelforge::server::{self, ServerState};

/// Run every background loop plus the health server until interrupted
pub async fn serve(app: AppContext, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| app.config().server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("'{bind}' is not a socket address"))?;

    if let Err(e) = reelforge::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    app.start();
    let state = ServerState::from_app(&app);
    let served = server::serve(addr, state, shutdown_signal()).await;

    app.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
