//! Per-caller token bucket for the v2 API.
//!
//! Callers are keyed by the `oid` claim of their token. Buckets of callers
//! that stay idle for longer than the configured window are evicted.

use crate::auth::Claims;
use crate::config::RateLimiterSettings;
use crate::errors::ApiError;
use crate::metrics_defs::RATE_LIMITED;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use moka::sync::Cache;
use parking_lot::Mutex;
use shared::counter;
use std::sync::Arc;
use std::time::Instant;

const ANONYMOUS: &str = "anonymous";
const MAX_TRACKED_CALLERS: u64 = 100_000;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: Cache<String, Arc<Mutex<Bucket>>>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(settings: &RateLimiterSettings) -> Self {
        RateLimiter {
            buckets: Cache::builder()
                .max_capacity(MAX_TRACKED_CALLERS)
                .time_to_idle(settings.window)
                .build(),
            rate: settings.requests_per_second,
            burst: f64::from(settings.burst),
        }
    }

    pub fn allow(&self, caller: &str) -> bool {
        self.allow_at(caller, Instant::now())
    }

    fn allow_at(&self, caller: &str, now: Instant) -> bool {
        let burst = self.burst;
        let bucket = self.buckets.get_with(caller.to_string(), || {
            Arc::new(Mutex::new(Bucket {
                tokens: burst,
                last_refill: now,
            }))
        });

        let mut bucket = bucket.lock();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Must run after the bearer token middleware.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| ApiError::Forbidden("missing caller identity".into()))?;
    let caller = claims.oid.as_deref().filter(|o| !o.is_empty()).unwrap_or(ANONYMOUS);

    if !limiter.allow(caller) {
        counter!(RATE_LIMITED).increment(1);
        tracing::debug!(caller, "Rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(rate: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimiterSettings {
            enabled: true,
            requests_per_second: rate,
            burst,
            window: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = limiter(1.0, 3);
        let now = Instant::now();
        assert!(limiter.allow_at("a", now));
        assert!(limiter.allow_at("a", now));
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));

        // other callers have their own bucket
        assert!(limiter.allow_at("b", now));
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = limiter(2.0, 1);
        let now = Instant::now();
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now + Duration::from_millis(200)));
        assert!(limiter.allow_at("a", now + Duration::from_millis(600)));
    }
}
