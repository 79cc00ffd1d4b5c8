use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::{
    services::{generate, health, ingest_logs, recent_logs},
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the HTTP router over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/logs", post(ingest_logs))
        .route("/api/generate", post(generate))
        .route("/operators/logs", get(recent_logs))
        .route("/operators/health", get(health))
        .route("/health", get(health))
        .with_state(state)
        // gzip/deflate/brotli request bodies, keyed on Content-Encoding
        .layer(RequestDecompressionLayer::new())
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn run(state: AppState, address: SocketAddr) -> Result<(), AnyError> {
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "genrelay API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}
