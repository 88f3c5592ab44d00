//! HTTP server for the advisory engine

use crate::api::routes;
use crate::engine::AdvisoryEngine;
use anyhow::{Context, Result};
use axum::Router;
use log::info;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Build the router with every boundary route
pub fn router(engine: Arc<AdvisoryEngine>) -> Router {
    Router::new()
        .merge(routes::service_routes())
        .merge(routes::log_routes())
        .merge(routes::advice_routes())
        .merge(routes::health_routes())
        .with_state(engine)
}

/// Serve until `shutdown` completes
///
/// In-flight requests are allowed to finish after the shutdown signal.
pub async fn serve<F>(engine: Arc<AdvisoryEngine>, bind: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}
