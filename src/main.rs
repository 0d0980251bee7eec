use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use whatsapp_gateway::AppCore;
use whatsapp_gateway::api;
use whatsapp_gateway::config::Config;
use whatsapp_gateway::session::BridgeClient;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    config.log_summary();

    let client = Arc::new(BridgeClient::new(config.bridge_url.clone()));
    let port = config.port;
    let (core, mut fatal_rx) = AppCore::new(config, client);
    let core = Arc::new(core);

    // Startup is strict: a session that cannot be created at boot aborts
    // the process even though a reconnect was already scheduled.
    if let Err(err) = core.manager.initialize().await {
        error!(error = %err, "session initialization failed, aborting");
        return Err(err).context("session initialization failed");
    }

    let app = api::build_router(core.clone());
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))?;
    info!(port, "HTTP server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            result.context("HTTP server error")?;
            info!("shutting down");
            core.manager.shutdown().await;
            Ok(())
        }
        fatal = fatal_rx.recv() => {
            if let Some(err) = fatal {
                error!(error = %err, "fatal session error, terminating");
            }
            core.manager.shutdown().await;
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
