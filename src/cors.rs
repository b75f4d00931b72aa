use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::config::ConfigError;
use crate::error::ProxyError;
use crate::pipeline::{Next, Stage};

pub const ALLOWED_METHODS: &str = "GET,OPTIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    // OPTIONS: answer here with the CORS headers
    Preflight,
    Forward,
}

/// Cross-origin policy: one allowed origin (or `*`), GET and OPTIONS only.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed_origin: HeaderValue,
    allowed_headers: HeaderValue,
    any_origin: bool,
}

impl OriginPolicy {
    pub fn new(allowed_origin: &str, allowed_headers: &str) -> Result<Self, ConfigError> {
        let header = |field: &'static str, value: &str| {
            HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader {
                field,
                value: value.to_string(),
            })
        };

        Ok(Self {
            allowed_origin: header("CLIENT_URL", allowed_origin)?,
            allowed_headers: header("CORS_ALLOWED_HEADERS", allowed_headers)?,
            any_origin: allowed_origin == "*",
        })
    }

    /// Requests without an `Origin` header are not cross-origin and pass the origin check.
    pub fn check(
        &self,
        method: &Method,
        origin: Option<&HeaderValue>,
    ) -> Result<Decision, ProxyError> {
        if method != Method::GET && method != Method::OPTIONS {
            return Err(ProxyError::DisallowedMethod(method.clone()));
        }

        if let Some(origin) = origin {
            if !self.any_origin && *origin != self.allowed_origin {
                return Err(ProxyError::DisallowedOrigin(
                    String::from_utf8_lossy(origin.as_bytes()).into_owned(),
                ));
            }
        }

        if method == Method::OPTIONS {
            Ok(Decision::Preflight)
        } else {
            Ok(Decision::Forward)
        }
    }

    pub fn annotate(&self, headers: &mut HeaderMap, preflight: bool) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allowed_origin.clone());
        if !self.any_origin {
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
        if preflight {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allowed_headers.clone());
        }
    }
}

impl Stage for OriginPolicy {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        match self.check(req.method(), req.headers().get(ORIGIN)) {
            Ok(Decision::Forward) => async move {
                let mut response = next.run(req).await;
                self.annotate(response.headers_mut(), false);
                response
            }
            .boxed(),
            Ok(Decision::Preflight) => {
                let mut response = StatusCode::NO_CONTENT.into_response();
                self.annotate(response.headers_mut(), true);
                futures_util::future::ready(response).boxed()
            }
            Err(err) => {
                debug!(error = %err, "request refused by origin policy");
                futures_util::future::ready(err.into_response()).boxed()
            }
        }
    }
}
