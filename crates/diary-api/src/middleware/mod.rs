//! HTTP middleware
//!
//! - JSON response headers on every response
//! - Prometheus request metrics
//! - Per-client rate limiting

pub mod metrics;
pub mod rate_limit;

pub use metrics::{metrics_middleware, Metrics, METRICS_CONTENT_TYPE};
pub use rate_limit::{rate_limit_middleware, RateLimiter};

use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Default JSON content type and basic security headers
pub async fn json_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}
