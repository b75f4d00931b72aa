use axum::Router;
use axum::routing::get;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::handlers::{metrics_handler, proxy_handler};
use crate::pipeline::Pipeline;

// Single catch-all route, every method and path goes to the pipeline
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new().fallback(proxy_handler).with_state(pipeline)
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve the pipeline on an already-bound listener until Ctrl+C.
pub async fn serve(listener: TcpListener, pipeline: Arc<Pipeline>) -> io::Result<()> {
    info!(address = %listener.local_addr()?, "proxy listening");

    axum::serve(
        listener,
        router(pipeline).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("proxy stopped");
    Ok(())
}

pub async fn serve_metrics(listener: TcpListener) -> io::Result<()> {
    info!(address = %listener.local_addr()?, "metrics listening");
    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
