//! Access log: one line per completed request.
//!
//! Line format: `<timestamp> <elapsed>ms <client ip> <method> <url>`.
//! The credential parameter's value is replaced in the logged URL.

use axum::body::Body;
use axum::http::{Method, Request, Uri};
use axum::response::Response;
use chrono::{DateTime, Local};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use url::form_urlencoded;

use crate::pipeline::{ClientIp, Next, Stage};

pub const REDACTED: &str = "REDACTED";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Append-only destination for log lines. Each call writes one whole line.
pub trait LogSink: Send + Sync {
    fn append<'a>(&'a self, line: &'a str) -> BoxFuture<'a, io::Result<()>>;
}

// File opened in append mode; the mutex keeps concurrent lines from interleaving
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn append<'a>(&'a self, line: &'a str) -> BoxFuture<'a, io::Result<()>> {
        async move {
            let mut file = self.file.lock().await;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .boxed()
    }
}

/// In-process sink, keeps lines in memory.
#[derive(Default)]
pub struct MemorySink {
    lines: StdMutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LogSink for MemorySink {
    fn append<'a>(&'a self, line: &'a str) -> BoxFuture<'a, io::Result<()>> {
        let result = self
            .lines
            .lock()
            .map(|mut lines| lines.push(line.to_string()))
            .map_err(|_| io::Error::other("memory sink poisoned"));
        futures_util::future::ready(result).boxed()
    }
}

#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Local>,
    pub response_time_ms: u128,
    pub client_ip: String,
    pub method: Method,
    pub url: String,
}

impl fmt::Display for AccessLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}ms {} {} {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.response_time_ms,
            self.client_ip,
            self.method,
            self.url
        )
    }
}

// Request details captured before the rest of the chain runs
#[derive(Debug)]
pub struct PendingEntry {
    started: Instant,
    client_ip: String,
    method: Method,
    url: String,
}

/// Marks a response whose log line has already been written.
#[derive(Debug, Clone, Copy)]
pub struct Logged;

#[derive(Clone)]
pub struct AccessLog {
    sink: Arc<dyn LogSink>,
    credential_param: Arc<str>,
}

impl AccessLog {
    pub fn new(sink: Arc<dyn LogSink>, credential_param: &str) -> Self {
        Self {
            sink,
            credential_param: Arc::from(credential_param),
        }
    }

    pub fn begin(&self, req: &Request<Body>) -> PendingEntry {
        self.begin_at(req, Instant::now())
    }

    pub fn begin_at(&self, req: &Request<Body>, started: Instant) -> PendingEntry {
        PendingEntry {
            started,
            client_ip: ClientIp::of(req).to_string(),
            method: req.method().clone(),
            url: redact_credential(req.uri(), &self.credential_param),
        }
    }

    // Sink failures are reported but never change the response
    pub async fn finish(&self, pending: PendingEntry) {
        let entry = AccessLogEntry {
            timestamp: Local::now(),
            response_time_ms: pending.started.elapsed().as_millis(),
            client_ip: pending.client_ip,
            method: pending.method,
            url: pending.url,
        };
        let line = format!("{entry}\n");

        if let Err(e) = self.sink.append(&line).await {
            warn!(error = %e, "failed to append access log entry");
        }
    }
}

impl Stage for AccessLog {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        async move {
            let pending = self.begin(&req);
            let mut response = next.run(req).await;
            self.finish(pending).await;
            response.extensions_mut().insert(Logged);
            response
        }
        .boxed()
    }
}

/// Path and query of `uri`, with every value of `param` replaced by [`REDACTED`].
/// Other pairs are kept exactly as received.
pub fn redact_credential(uri: &Uri, param: &str) -> String {
    let path = uri.path();
    let Some(query) = uri.query() else {
        return path.to_string();
    };

    let redacted: Vec<String> = query
        .split('&')
        .map(|pair| {
            let is_credential = form_urlencoded::parse(pair.as_bytes())
                .next()
                .is_some_and(|(key, _)| key == param);
            if is_credential {
                let raw_key = pair.split('=').next().unwrap_or(pair);
                format!("{raw_key}={REDACTED}")
            } else {
                pair.to_string()
            }
        })
        .collect();

    format!("{path}?{}", redacted.join("&"))
}
