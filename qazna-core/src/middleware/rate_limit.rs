use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::error_response;
use crate::middleware::{client_ip, request_id};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const BUCKET_IDLE_TTL: Duration = Duration::from_secs(300);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct Bucket {
    limiter: Arc<DirectLimiter>,
    last_seen: Instant,
}

struct Buckets {
    by_ip: HashMap<String, Bucket>,
    last_sweep: Instant,
}

/// Per-client-IP token bucket. Buckets live in a mutex-guarded map and are
/// swept once a minute, dropping entries idle for more than five minutes.
pub struct IpRateLimiter {
    buckets: Mutex<Buckets>,
    quota: Quota,
}

impl IpRateLimiter {
    pub fn new(burst: u32, per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second.max(1)).expect("non-zero rps");
        let burst = NonZeroU32::new(burst.max(1)).expect("non-zero burst");
        Self {
            buckets: Mutex::new(Buckets { by_ip: HashMap::new(), last_sweep: Instant::now() }),
            quota: Quota::per_second(per_second).allow_burst(burst),
        }
    }

    /// Record the client and try to consume one token. Returns false when
    /// the request must be rejected.
    pub fn allow(&self, ip: &str) -> bool {
        let limiter = {
            let mut state = match self.buckets.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            if now.duration_since(state.last_sweep) >= SWEEP_INTERVAL {
                state.by_ip.retain(|_, bucket| now.duration_since(bucket.last_seen) <= BUCKET_IDLE_TTL);
                state.last_sweep = now;
            }
            let bucket = state.by_ip.entry(ip.to_string()).or_insert_with(|| Bucket {
                limiter: Arc::new(RateLimiter::direct(self.quota)),
                last_seen: now,
            });
            bucket.last_seen = now;
            Arc::clone(&bucket.limiter)
        };
        limiter.check().is_ok()
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().map(|s| s.by_ip.len()).unwrap_or(0)
    }
}

/// Token-bucket middleware. `OPTIONS` bypasses the limiter so CORS
/// preflights are never throttled.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<IpRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let ip = client_ip(&req).unwrap_or_else(|| "unknown".to_string());
    if limiter.allow(&ip) {
        return next.run(req).await;
    }

    let rid = request_id(&req);
    error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded", rid.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_one_denies_second_request() {
        let limiter = IpRateLimiter::new(1, 1);
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn buckets_are_per_client() {
        let limiter = IpRateLimiter::new(1, 1);
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn generous_quota_allows_bursts() {
        let limiter = IpRateLimiter::new(10, 100);
        for _ in 0..10 {
            assert!(limiter.allow("10.0.0.3"));
        }
    }
}
