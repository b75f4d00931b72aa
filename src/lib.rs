//! Forwarding proxy that injects a server-held API key into upstream calls.

pub mod access_log;
pub mod config;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod proxy;
pub mod rate_limit;
pub mod server;

pub use config::{Args, Config, ConfigError};
pub use error::ProxyError;
pub use pipeline::Pipeline;
