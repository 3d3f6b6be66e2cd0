//! HTTP front end for the ROM library
//!
//! Thin axum layer: routes requests into `RomStore` and maps its errors to
//! status codes.

pub mod routes;
pub mod sink;

#[cfg(test)]
mod tests;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::filesystem::RomStore;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RomStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn RomStore>) -> Self {
        Self { store }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
        .expose_headers([
            header::CONTENT_DISPOSITION,
            header::CONTENT_LENGTH,
            HeaderName::from_static(routes::TOTAL_COUNT_HEADER),
        ]);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/roms", get(routes::list_roms))
        .route("/api/roms/:name", get(routes::download_rom))
        .layer(cors)
        .with_state(state)
}

pub async fn bind(config: &ServerConfig) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::new(config.bind, config.port);
    TcpListener::bind(addr).await
}

/// Serve until Ctrl+C (or SIGTERM on unix)
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Resolves on SIGTERM or Ctrl+C
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(
                "Failed to set up SIGTERM handler: {:?}. Only Ctrl+C will work for shutdown.",
                e
            );
            shutdown_signal_ctrlc_only().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down (Ctrl+C)"),
        _ = sigterm.recv() => tracing::info!("Shutting down (SIGTERM)"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    shutdown_signal_ctrlc_only().await;
}

async fn shutdown_signal_ctrlc_only() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down (Ctrl+C)");
}
