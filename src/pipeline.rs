//! Request pipeline.
//!
//! Every inbound request runs through a fixed chain of stages:
//! rate limiting, origin policy, access logging, and finally the
//! forwarder. Any stage may answer on its own without calling `next`.

use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::access_log::{AccessLog, LogSink, Logged};
use crate::config::{Config, ConfigError};
use crate::cors::OriginPolicy;
use crate::metrics::REQUEST_TOTAL;
use crate::proxy::ProxyForwarder;
use crate::rate_limit::RateLimiter;

/// A middleware step. Calls `next.run(req)` to continue the chain,
/// or returns its own response to short-circuit it.
pub trait Stage: Send + Sync {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response>;
}

/// Terminal handler at the end of the chain.
pub trait Endpoint: Send + Sync {
    fn call(&self, req: Request<Body>) -> BoxFuture<'_, Response>;
}

impl<S: Stage + ?Sized> Stage for Arc<S> {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        (**self).handle(req, next)
    }
}

/// The remainder of the chain after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Box<dyn Stage>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn run(self, req: Request<Body>) -> BoxFuture<'a, Response> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(
                req,
                Next {
                    stages: rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(req),
        }
    }
}

/// Caller address, attached to the request extensions on entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    /// Only a forwarded value that parses as an IP address is used; anything
    /// else falls back to the peer address.
    pub fn resolve(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        trust_forwarded_for: bool,
    ) -> Self {
        let forwarded = trust_forwarded_for
            .then(|| headers.get("x-forwarded-for"))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());

        match (forwarded, peer) {
            (Some(ip), _) => Self(ip.to_string()),
            (None, Some(addr)) => Self(addr.ip().to_string()),
            (None, None) => Self("unknown".to_string()),
        }
    }

    pub fn of(req: &Request<Body>) -> &str {
        req.extensions()
            .get::<ClientIp>()
            .map(|ip| ip.0.as_str())
            .unwrap_or("unknown")
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    endpoint: Box<dyn Endpoint>,
    rate_limiter: Arc<RateLimiter>,
    access_log: AccessLog,
    trust_forwarded_for: bool,
}

impl Pipeline {
    /// Wire the fixed chain: rate limiter, origin policy, access log, forwarder.
    pub fn new(
        config: &Config,
        client: reqwest::Client,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ConfigError> {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.max_requests_per_window,
            config.window_duration,
        ));
        let origin_policy = OriginPolicy::new(&config.allowed_origin, &config.allowed_headers)?;
        let access_log = AccessLog::new(sink, &config.credential_param_name);
        let forwarder = ProxyForwarder::new(client, config);

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Arc::clone(&rate_limiter)),
            Box::new(origin_policy),
            Box::new(access_log.clone()),
        ];

        Ok(Self {
            stages,
            endpoint: Box::new(forwarder),
            rate_limiter,
            access_log,
            trust_forwarded_for: config.trust_forwarded_for,
        })
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.rate_limiter)
    }

    /// Run one request through the chain.
    ///
    /// Requests answered before the access log stage (quota rejections,
    /// preflights, origin or method rejections) are logged here, timed from
    /// entry, so every request produces exactly one log line.
    pub async fn handle(&self, mut req: Request<Body>, peer: Option<SocketAddr>) -> Response {
        REQUEST_TOTAL.inc();
        let started = Instant::now();

        let client_ip = ClientIp::resolve(req.headers(), peer, self.trust_forwarded_for);
        debug!(client = %client_ip.0, method = %req.method(), "inbound request");
        req.extensions_mut().insert(client_ip);
        let pending = self.access_log.begin_at(&req, started);

        let next = Next {
            stages: &self.stages,
            endpoint: self.endpoint.as_ref(),
        };
        let response = next.run(req).await;

        if response.extensions().get::<Logged>().is_none() {
            self.access_log.finish(pending).await;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use futures_util::FutureExt;
    use std::sync::Mutex;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Stage for Tag {
        fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
            self.1.lock().unwrap().push(self.0);
            next.run(req)
        }
    }

    struct Stop;

    impl Stage for Stop {
        fn handle<'a>(&'a self, _req: Request<Body>, _next: Next<'a>) -> BoxFuture<'a, Response> {
            futures_util::future::ready(StatusCode::IM_A_TEAPOT.into_response()).boxed()
        }
    }

    struct Terminal(Arc<Mutex<Vec<&'static str>>>);

    impl Endpoint for Terminal {
        fn call(&self, _req: Request<Body>) -> BoxFuture<'_, Response> {
            self.0.lock().unwrap().push("endpoint");
            futures_util::future::ready(StatusCode::OK.into_response()).boxed()
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Tag("first", seen.clone())),
            Box::new(Tag("second", seen.clone())),
        ];
        let endpoint = Terminal(seen.clone());
        let next = Next { stages: &stages, endpoint: &endpoint };

        let response = next.run(Request::new(Body::empty())).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "endpoint"]);
    }

    #[tokio::test]
    async fn test_stage_can_short_circuit() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Tag("first", seen.clone())),
            Box::new(Stop),
            Box::new(Tag("never", seen.clone())),
        ];
        let endpoint = Terminal(seen.clone());
        let next = Next { stages: &stages, endpoint: &endpoint };

        let response = next.run(Request::new(Body::empty())).await;

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(ClientIp::resolve(&headers, Some(peer), true).0, "203.0.113.7");
        assert_eq!(ClientIp::resolve(&headers, Some(peer), false).0, "127.0.0.1");
    }

    #[test]
    fn test_client_ip_fallbacks() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "[::1]:4000".parse().unwrap();

        assert_eq!(ClientIp::resolve(&headers, Some(peer), true).0, "::1");
        assert_eq!(ClientIp::resolve(&headers, None, true).0, "unknown");
    }

    #[test]
    fn test_client_ip_ignores_malformed_forwarded_for() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        for forged in ["1.2.3.4 POST /forged", "not-an-ip", "", "  ,10.0.0.1"] {
            let mut headers = HeaderMap::new();
            headers.insert("x-forwarded-for", forged.parse().unwrap());

            assert_eq!(ClientIp::resolve(&headers, Some(peer), true).0, "127.0.0.1");
            assert_eq!(ClientIp::resolve(&headers, None, true).0, "unknown");
        }
    }
}
