//! Prometheus metrics
//!
//! Request counters and latencies are recorded by [`metrics_middleware`];
//! cache and rate limiter gauges are sampled when `/metrics` is scraped.

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use diary_core::CacheStats;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Content type of the text exposition format
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Metrics registry owned by the application state
pub struct Metrics {
    registry: Registry,
    http_requests: IntCounterVec,
    http_duration: HistogramVec,
    pub rate_limited: IntCounter,
    uptime: IntGauge,
    rate_limit_clients: IntGauge,
    cache_hits: IntGaugeVec,
    cache_misses: IntGaugeVec,
    cache_invalidations: IntGaugeVec,
    cache_hit_ratio: GaugeVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("diary".to_string()), None)?;

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by response status"),
            &["method", "endpoint", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "endpoint"],
        )?;
        let rate_limited = IntCounter::new(
            "rate_limited_requests_total",
            "Requests rejected by the rate limiter",
        )?;
        let uptime = IntGauge::new("uptime_seconds", "Seconds since the server started")?;
        let rate_limit_clients = IntGauge::new(
            "rate_limit_clients",
            "Clients currently tracked by the rate limiter",
        )?;
        let cache_hits = IntGaugeVec::new(
            Opts::new("cache_hits", "Repository cache hits"),
            &["cache"],
        )?;
        let cache_misses = IntGaugeVec::new(
            Opts::new("cache_misses", "Repository cache misses"),
            &["cache"],
        )?;
        let cache_invalidations = IntGaugeVec::new(
            Opts::new("cache_invalidations", "Repository cache invalidations"),
            &["cache"],
        )?;

        let cache_hit_ratio = GaugeVec::new(
            Opts::new("cache_hit_ratio", "Repository cache hit ratio (0.0 - 1.0)"),
            &["cache"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(uptime.clone()))?;
        registry.register(Box::new(rate_limit_clients.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_invalidations.clone()))?;
        registry.register(Box::new(cache_hit_ratio.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            rate_limited,
            uptime,
            rate_limit_clients,
            cache_hits,
            cache_misses,
            cache_invalidations,
            cache_hit_ratio,
        })
    }

    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.http_duration
            .with_label_values(&[method, endpoint])
            .observe(elapsed.as_secs_f64());
    }

    /// Sample gauges backed by state outside the registry
    pub fn sample(&self, uptime_secs: u64, caches: &[Arc<CacheStats>], clients: Option<usize>) {
        self.uptime.set(gauge_value(uptime_secs));
        self.rate_limit_clients
            .set(clients.map_or(0, |n| gauge_value(n as u64)));
        for stats in caches {
            let name = [stats.name()];
            self.cache_hits
                .with_label_values(&name)
                .set(gauge_value(stats.hits()));
            self.cache_misses
                .with_label_values(&name)
                .set(gauge_value(stats.misses()));
            self.cache_invalidations
                .with_label_values(&name)
                .set(gauge_value(stats.invalidations()));
            self.cache_hit_ratio
                .with_label_values(&name)
                .set(stats.hit_rate());
        }
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Record method, normalized endpoint, status and latency of every request
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = normalize_endpoint(request.uri().path());

    let response = next.run(request).await;

    state.metrics.observe_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        start.elapsed(),
    );

    response
}

/// Replace numeric path segments with `:id` to keep label cardinality bounded
fn normalize_endpoint(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
