mod metrics;
mod proxy;

pub use metrics::metrics_handler;
pub use proxy::proxy_handler;
