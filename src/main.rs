use api_key_proxy::access_log::FileSink;
use api_key_proxy::config::{ENV_FILE, load_env_file};
use api_key_proxy::{Args, Config, Pipeline, rate_limit, server};
use clap::Parser; // for cli
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // before anything reads the environment, RUST_LOG included
    let env_file_loaded = load_env_file(ENV_FILE)?;

    // RUST_LOG wins, otherwise info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if env_file_loaded {
        info!(path = ENV_FILE, "loaded environment file");
    }

    let config = Config::try_from(Args::parse())?;
    info!(config = ?config, "configuration loaded");

    let client = reqwest::Client::builder()
        .timeout(config.upstream_timeout)
        .build()?;
    let sink = Arc::new(FileSink::open(&config.log_file).await?);
    info!(path = %sink.path().display(), "access log opened");

    let pipeline = Arc::new(Pipeline::new(&config, client, sink)?);

    // keep the rate limit table bounded by clients active in one window
    tokio::spawn(rate_limit::sweeper(pipeline.rate_limiter(), config.window_duration));

    if let Some(port) = config.metrics_port {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tokio::spawn(async move {
            if let Err(e) = server::serve_metrics(listener).await {
                error!(error = %e, "metrics server failed");
            }
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!(
        upstream = %config.upstream_base_url,
        rate_limit = config.max_requests_per_window,
        window_ms = config.window_duration.as_millis() as u64,
        "forwarding with credential injection"
    );
    server::serve(listener, pipeline).await?;

    Ok(())
}
