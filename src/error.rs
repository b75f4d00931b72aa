use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::cors::ALLOWED_METHODS;

pub const QUOTA_EXCEEDED_MESSAGE: &str = "Too many requests, please try again later.";

/// Per-request failures. None of them outlive the request that raised it.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("rate limit exceeded")]
    QuotaExceeded,
    #[error("origin {0:?} is not allowed")]
    DisallowedOrigin(String),
    #[error("method {0} is not allowed")]
    DisallowedMethod(Method),
    // Carries a reqwest error with the URL already stripped
    #[error("upstream request failed: {0}")]
    Upstream(reqwest::Error),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        // the URL holds the injected credential
        Self::Upstream(err.without_url())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::QuotaExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, QUOTA_EXCEEDED_MESSAGE).into_response()
            }
            Self::DisallowedOrigin(_) => {
                (StatusCode::FORBIDDEN, "Origin not allowed").into_response()
            }
            Self::DisallowedMethod(_) => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, ALLOWED_METHODS)],
                "Method not allowed",
            )
                .into_response(),
            Self::Upstream(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Upstream request failed").into_response()
            }
        }
    }
}
