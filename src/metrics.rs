use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, TextEncoder, register_counter, register_gauge,
    register_histogram,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("proxy_requests_total", "Total number of inbound requests").unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "proxy_rate_limited_total",
        "Requests rejected by the rate limiter"
    )
    .unwrap();
    pub static ref UPSTREAM_ERRORS_TOTAL: Counter =
        register_counter!("proxy_upstream_errors_total", "Failed upstream calls").unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "proxy_upstream_latency_seconds",
        "Time until the upstream response head arrives, in seconds"
    )
    .unwrap();
    pub static ref TRACKED_CLIENTS: Gauge = register_gauge!(
        "proxy_rate_limit_clients",
        "Clients with a live rate limit window"
    )
    .unwrap();
}

// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        REQUEST_TOTAL.inc();
        let text = render().unwrap();
        assert!(text.contains("proxy_requests_total"));
    }
}
