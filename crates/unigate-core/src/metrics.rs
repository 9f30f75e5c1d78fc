use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus instruments for the gateway. One instance per process,
/// injected wherever something is worth counting.
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub http_duration: HistogramVec,
    pub http_response_bytes: IntCounterVec,
    pub upstream_attempts: IntCounterVec,
    pub ratelimit_rejections: IntCounterVec,
    pub grid_cache: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("unigate_http_requests_total", "Requests by method/path/status"),
            &["method", "path", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "unigate_http_request_duration_seconds",
                "Request latency by method/path",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            &["method", "path"],
        )?;
        let http_response_bytes = IntCounterVec::new(
            Opts::new(
                "unigate_http_response_bytes_total",
                "Response body bytes by path",
            ),
            &["path"],
        )?;
        let upstream_attempts = IntCounterVec::new(
            Opts::new(
                "unigate_upstream_attempts_total",
                "Upstream attempts by provider/outcome",
            ),
            &["provider", "outcome"],
        )?;
        let ratelimit_rejections = IntCounterVec::new(
            Opts::new(
                "unigate_ratelimit_rejections_total",
                "Rate limited requests by path",
            ),
            &["path"],
        )?;
        let grid_cache = IntCounterVec::new(
            Opts::new(
                "unigate_grid_cache_total",
                "Proxy Grid cache lookups by service/result",
            ),
            &["service", "result"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(http_response_bytes.clone()))?;
        registry.register(Box::new(upstream_attempts.clone()))?;
        registry.register(Box::new(ratelimit_rejections.clone()))?;
        registry.register(Box::new(grid_cache.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            http_response_bytes,
            upstream_attempts,
            ratelimit_rejections,
            grid_cache,
        })
    }

    /// Text exposition for `/metrics`.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %err, "metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
