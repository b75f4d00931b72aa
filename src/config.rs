use clap::{ArgAction, Parser};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_FILE: &str = ".env";

/// Export `KEY=value` lines from `path` into the process environment so the
/// `env = ...` fallbacks below see them. Variables already set win.
/// A missing file is not an error; returns whether one was loaded.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<bool, dotenvy::Error> {
    match dotenvy::from_path(path.as_ref()) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

// CLI argument structure, every flag falls back to its environment variable
#[derive(Parser, Clone)]
#[command(name = "api-key-proxy")]
#[command(about = "Forwarding proxy that keeps the upstream API key on the server")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    // Upstream endpoint, queried as "<base>?<params>"
    #[arg(long, env = "API_BASE_URL")]
    pub api_base_url: String,

    // Query parameter that carries the credential
    #[arg(long, env = "API_KEY_NAME")]
    pub api_key_name: String,

    #[arg(long, env = "API_KEY_VALUE", hide_env_values = true)]
    pub api_key_value: String,

    // Allowed CORS origin ("*" for any)
    #[arg(long, env = "CLIENT_URL", default_value = "*")]
    pub client_url: String,

    // Rate limit max requests per window
    #[arg(long, env = "RATE_REQUEST_MAX", default_value_t = 50)]
    pub rate_request_max: u32,

    // Rate limit window in milliseconds (one day by default)
    #[arg(long, env = "RATE_WINDOW_MS", default_value_t = 86_400_000)]
    pub rate_window_ms: u64,

    // Access log file, appended to
    #[arg(long, env = "LOG_FILE", default_value = "requests.log")]
    pub log_file: PathBuf,

    #[arg(
        long,
        env = "CORS_ALLOWED_HEADERS",
        default_value = "X-Requested-With,content-type"
    )]
    pub cors_allowed_headers: String,

    // Upstream call timeout in milliseconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value_t = 30_000)]
    pub upstream_timeout_ms: u64,

    // Pass the upstream status through instead of always answering 200
    #[arg(
        long,
        env = "MIRROR_UPSTREAM_STATUS",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub mirror_upstream_status: bool,

    // Use the first X-Forwarded-For entry as the client address
    #[arg(
        long,
        env = "TRUST_FORWARDED_FOR",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub trust_forwarded_for: bool,

    // Serve Prometheus metrics on this port when set
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid API_BASE_URL {url:?}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("API_BASE_URL must be http or https, got {0:?}")]
    UnsupportedScheme(String),
    #[error("API_KEY_NAME must not be empty")]
    EmptyCredentialName,
    #[error("RATE_REQUEST_MAX must be at least 1")]
    ZeroQuota,
    #[error("RATE_WINDOW_MS must be greater than zero")]
    ZeroWindow,
    #[error("{field} is not a valid header value: {value:?}")]
    InvalidHeader { field: &'static str, value: String },
}

/// Settings resolved once at startup. Never mutated afterwards.
#[derive(Clone)]
pub struct Config {
    pub listen_port: u16,
    pub upstream_base_url: String,
    pub credential_param_name: String,
    pub credential_value: String,
    pub allowed_origin: String,
    pub allowed_headers: String,
    pub window_duration: Duration,
    pub max_requests_per_window: u32,
    pub log_file: PathBuf,
    pub upstream_timeout: Duration,
    pub mirror_upstream_status: bool,
    pub trust_forwarded_for: bool,
    pub metrics_port: Option<u16>,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let base = Url::parse(&args.api_base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            url: args.api_base_url.clone(),
            source,
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(base.scheme().to_string()));
        }
        if args.api_key_name.is_empty() {
            return Err(ConfigError::EmptyCredentialName);
        }
        if args.rate_request_max == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        if args.rate_window_ms == 0 {
            return Err(ConfigError::ZeroWindow);
        }

        Ok(Self {
            listen_port: args.port,
            upstream_base_url: args.api_base_url,
            credential_param_name: args.api_key_name,
            credential_value: args.api_key_value,
            allowed_origin: args.client_url,
            allowed_headers: args.cors_allowed_headers,
            window_duration: Duration::from_millis(args.rate_window_ms),
            max_requests_per_window: args.rate_request_max,
            log_file: args.log_file,
            upstream_timeout: Duration::from_millis(args.upstream_timeout_ms),
            mirror_upstream_status: args.mirror_upstream_status,
            trust_forwarded_for: args.trust_forwarded_for,
            metrics_port: args.metrics_port,
        })
    }
}

// Keeps the credential out of startup logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen_port", &self.listen_port)
            .field("upstream_base_url", &self.upstream_base_url)
            .field("credential_param_name", &self.credential_param_name)
            .field("credential_value", &"<redacted>")
            .field("allowed_origin", &self.allowed_origin)
            .field("allowed_headers", &self.allowed_headers)
            .field("window_duration", &self.window_duration)
            .field("max_requests_per_window", &self.max_requests_per_window)
            .field("log_file", &self.log_file)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("mirror_upstream_status", &self.mirror_upstream_status)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}
