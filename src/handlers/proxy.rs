use axum::{body::Body, extract::{ConnectInfo, State}, http::Request, response::Response};
use std::net::SocketAddr;
use std::sync::Arc;
use crate::pipeline::Pipeline;

// Fallback handler: hands every inbound request to the pipeline.
// The peer address is only present when served with connect info.
pub async fn proxy_handler(
    State(pipeline): State<Arc<Pipeline>>,
    req: Request<Body>,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    pipeline.handle(req, peer).await
}
