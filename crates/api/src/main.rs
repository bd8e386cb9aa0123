#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! ClubHub API Server

use std::net::SocketAddr;

use clubhub_api::{
    build_app,
    config::{Config, LogFormat},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (.env is read first if present)
    let config = Config::from_env()?;

    init_tracing(config.log_format);
    tracing::info!("Starting ClubHub API Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(config = ?config, "Configuration loaded");

    let state = AppState::from_config(config.clone())?;

    // Warm the gate in the background; requests still wait on it either way
    if config.db_eager_connect {
        let gate = state.gate.clone();
        tokio::spawn(async move {
            match gate.ensure_ready().await {
                Ok(_) => tracing::info!("Credential store connected at startup"),
                Err(e) => tracing::warn!(
                    error = %e,
                    "Startup connection failed; requests will retry through the gate"
                ),
            }
        });
    }

    let app = build_app(state);

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,clubhub_api=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
