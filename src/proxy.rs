use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::time::Instant;
use tracing::{debug, error};
use url::form_urlencoded;

use crate::config::Config;
use crate::error::ProxyError;
use crate::metrics::{UPSTREAM_ERRORS_TOTAL, UPSTREAM_LATENCY};
use crate::pipeline::{ClientIp, Endpoint};

/// Terminal stage: makes exactly one upstream GET per request and streams
/// the body back. No retries, no caching.
pub struct ProxyForwarder {
    client: reqwest::Client,
    upstream_base_url: String,
    credential_name: String,
    credential_value: String,
    mirror_upstream_status: bool,
}

impl ProxyForwarder {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            upstream_base_url: config.upstream_base_url.clone(),
            credential_name: config.credential_param_name.clone(),
            credential_value: config.credential_value.clone(),
            mirror_upstream_status: config.mirror_upstream_status,
        }
    }

    pub fn upstream_url(&self, query: Option<&str>) -> String {
        let query = with_credential(
            query.unwrap_or(""),
            &self.credential_name,
            &self.credential_value,
        );
        format!("{}?{}", self.upstream_base_url, query)
    }

    pub async fn forward(&self, req: Request<Body>) -> Result<Response, ProxyError> {
        let url = self.upstream_url(req.uri().query());
        let started = Instant::now();

        let upstream = self.client.get(&url).send().await?;
        UPSTREAM_LATENCY.observe(started.elapsed().as_secs_f64());

        let status = if self.mirror_upstream_status {
            upstream.status()
        } else {
            StatusCode::OK
        };
        debug!(upstream_status = %upstream.status(), status = %status, "upstream responded");

        let content_type = upstream.headers().get(CONTENT_TYPE).cloned();
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        if let Some(content_type) = content_type {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        Ok(response)
    }
}

impl Endpoint for ProxyForwarder {
    fn call(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        async move {
            let client = ClientIp::of(&req).to_string();
            match self.forward(req).await {
                Ok(response) => response,
                Err(err) => {
                    UPSTREAM_ERRORS_TOTAL.inc();
                    error!(client = %client, error = %err, "forwarding failed");
                    err.into_response()
                }
            }
        }
        .boxed()
    }
}

/// Append `name=value` to a raw query string unless `name` is already present.
/// An existing query is returned untouched when it carries the parameter.
pub fn with_credential(query: &str, name: &str, value: &str) -> String {
    let present = form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == name);
    if present {
        return query.to_string();
    }

    let pair = form_urlencoded::Serializer::new(String::new())
        .append_pair(name, value)
        .finish();
    let query = query.trim_end_matches('&');
    if query.is_empty() {
        pair
    } else {
        format!("{query}&{pair}")
    }
}
