//! Shared helpers for pipeline tests.

use api_key_proxy::access_log::MemorySink;
use api_key_proxy::{Args, Config, Pipeline};
use axum::Router;
use axum::body::Body;
use axum::extract::RawQuery;
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Queries the mock upstream has received, in arrival order.
pub type Seen = Arc<Mutex<Vec<String>>>;

/// Start a mock upstream on 127.0.0.1:0 serving `/data`.
///
/// Answers JSON echoing the query, except `?status=404` which answers 404.
pub async fn start_mock_upstream() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();

    let app = Router::new().route(
        "/data",
        get(move |RawQuery(query): RawQuery| {
            let recorder = recorder.clone();
            async move {
                let query = query.unwrap_or_default();
                recorder.lock().unwrap().push(query.clone());
                if query.contains("status=404") {
                    return (StatusCode::NOT_FOUND, "missing").into_response();
                }
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    format!("{{\"query\":\"{query}\"}}"),
                )
                    .into_response()
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn config(base_url: &str, extra: &[&str]) -> Config {
    let mut argv = vec![
        "api-key-proxy",
        "--api-base-url",
        base_url,
        "--api-key-name",
        "key",
        "--api-key-value",
        "secret",
    ];
    argv.extend_from_slice(extra);
    Config::try_from(Args::try_parse_from(argv).unwrap()).unwrap()
}

pub fn pipeline(config: &Config) -> (Arc<Pipeline>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new(config, reqwest::Client::new(), sink.clone()).unwrap();
    (Arc::new(pipeline), sink)
}

pub fn get_from(client_ip: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", client_ip)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
