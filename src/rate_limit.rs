use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::metrics::{RATE_LIMITED_TOTAL, TRACKED_CLIENTS};
use crate::pipeline::{ClientIp, Next, Stage};

// Rate limit window - tracks requests per client IP
#[derive(Debug, Clone, Copy)]
pub struct ClientWindow {
    pub window_start: Instant,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected,
}

/// Fixed-window counter per client.
///
/// A window opens on a client's first request and admits up to
/// `max_requests`; once it has lasted `window` the next request opens a new
/// one. There is no smoothing across window boundaries, so a client may burst
/// up to twice the quota around a rollover.
pub struct RateLimiter {
    windows: DashMap<String, ClientWindow>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    // The entry guard holds the shard lock, so updates for one key never interleave
    pub fn admit(&self, key: &str, now: Instant) -> Admission {
        let mut entry = self.windows.entry(key.to_string()).or_insert(ClientWindow {
            window_start: now,
            count: 0,
        });

        // window expired..? Reset it
        if now.saturating_duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 1;
            return Admission::Allowed;
        }

        if entry.count < self.max_requests {
            entry.count += 1;
            return Admission::Allowed;
        }

        // over limit, count stays put
        Admission::Rejected
    }

    /// Drop windows that have already rolled over. Returns how many were removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.window_start) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn client_window(&self, key: &str) -> Option<ClientWindow> {
        self.windows.get(key).map(|w| *w)
    }
}

impl Stage for RateLimiter {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let client = ClientIp::of(&req);
        match self.admit(client, Instant::now()) {
            Admission::Allowed => next.run(req),
            Admission::Rejected => {
                RATE_LIMITED_TOTAL.inc();
                warn!(client = %client, "rate limit exceeded");
                futures_util::future::ready(ProxyError::QuotaExceeded.into_response()).boxed()
            }
        }
    }
}

// Background sweep so the table only holds clients seen within one window
pub async fn sweeper(limiter: Arc<RateLimiter>, every: Duration) {
    let mut ticker = interval(every.max(Duration::from_secs(1)));

    loop {
        ticker.tick().await;

        let evicted = limiter.evict_expired(Instant::now());
        TRACKED_CLIENTS.set(limiter.tracked_clients() as f64);
        if evicted > 0 {
            debug!(
                evicted,
                remaining = limiter.tracked_clients(),
                "evicted expired rate limit windows"
            );
        }
    }
}
