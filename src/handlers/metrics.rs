use axum::http::StatusCode;
use tracing::error;
use crate::metrics;

pub async fn metrics_handler() -> Result<String, StatusCode> {
    metrics::render().map_err(|e| {
        error!(error = %e, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
