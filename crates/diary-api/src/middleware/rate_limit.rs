//! Per-client rate limiting
//!
//! Each client key (the proxy-reported IP, else the peer address) gets its
//! own GCRA quota of `per_second` with bursts up to `burst_size`. A
//! background task owned by the limiter forgets clients whose quota has
//! fully replenished; the task ends once the limiter is dropped.

use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use diary_core::RateLimitConfig;
use governor::{DefaultKeyedRateLimiter, Quota};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Keyed limiter shared by every request
pub struct RateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    cleanup_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.per_second).unwrap_or(NonZeroU32::MIN);
        let burst_size = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: governor::RateLimiter::keyed(quota),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs.max(1)),
        }
    }

    /// Take one cell of `key`'s quota; false when it is exhausted
    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Forget clients whose quota is back to full
    pub fn sweep(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }

    pub fn visitor_count(&self) -> usize {
        self.limiter.len()
    }

    /// Start the periodic sweep
    pub fn spawn_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        let period = self.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, "Swept idle rate limit visitors");
                }
            }
        })
    }
}

/// Reject requests with 429 once a client's quota is exhausted
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    let key = extract_ip_address(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    if !limiter.check(&key) {
        state.metrics.rate_limited.inc();
        audit_log(&AuditEvent::RateLimited {
            client_key: key,
            path: request.uri().path().to_string(),
        });
        return AppError::TooManyRequests.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = limiter();

        for _ in 0..5 {
            assert!(limiter.check("203.0.113.1"));
        }
        assert!(!limiter.check("203.0.113.1"));

        // Other clients have their own quota
        assert!(limiter.check("198.51.100.7"));
        assert_eq!(limiter.visitor_count(), 2);
    }

    #[tokio::test]
    async fn test_refill_one_per_second() {
        let limiter = limiter();

        for _ in 0..5 {
            limiter.check("client");
        }
        assert!(!limiter.check("client"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.check("client"));
        assert!(!limiter.check("client"));
    }

    #[test]
    fn test_zero_quota_falls_back_to_one() {
        let limiter = RateLimiter::new(RateLimitConfig {
            per_second: 0,
            burst_size: 0,
            ..Default::default()
        });

        assert!(limiter.check("client"));
        assert!(!limiter.check("client"));
    }

    #[tokio::test]
    async fn test_sweep_forgets_replenished_clients() {
        let limiter = limiter();
        limiter.check("idle");
        for _ in 0..5 {
            limiter.check("busy");
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // "idle" is back to a full quota, "busy" is still four cells short
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.visitor_count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_with_limiter() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            cleanup_interval_secs: 1,
            ..Default::default()
        }));
        let handle = limiter.spawn_cleanup();
        drop(limiter);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cleanup task did not stop")
            .unwrap();
    }
}
