use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fixed-window rate limiter, one bucket per caller identifier, minute
/// granularity. Injected where needed; owns nothing global. The sweeper is
/// started and stopped explicitly by the process supervisor.
pub struct RateLimiter {
    requests_per_minute: u32,
    cleanup_interval: Duration,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: i64,
    count: u32,
    last_seen: i64,
}

/// Result of one admission check, with the header values to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the window resets.
    pub reset_epoch: i64,
    /// Seconds until reset; populated on rejection for `Retry-After`.
    pub retry_after: u64,
}

const WINDOW_SECS: i64 = 60;

impl RateLimiter {
    pub fn new(requests_per_minute: u32, cleanup_interval: Duration) -> Self {
        Self {
            requests_per_minute,
            cleanup_interval,
            buckets: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Admission check for `identifier` at `now` (epoch seconds). Holds the
    /// table lock for O(1) work.
    pub fn check_at(&self, identifier: &str, now: i64) -> RateDecision {
        let mut buckets = self.buckets.lock().expect("rate limit table poisoned");
        let bucket = buckets.entry(identifier.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
            last_seen: now,
        });
        bucket.last_seen = now;
        if now - bucket.window_start >= WINDOW_SECS {
            bucket.window_start = now;
            bucket.count = 0;
        }
        let reset_epoch = bucket.window_start + WINDOW_SECS;
        if bucket.count >= self.requests_per_minute {
            return RateDecision {
                allowed: false,
                limit: self.requests_per_minute,
                remaining: 0,
                reset_epoch,
                retry_after: (reset_epoch - now).max(1) as u64,
            };
        }
        bucket.count += 1;
        RateDecision {
            allowed: true,
            limit: self.requests_per_minute,
            remaining: self.requests_per_minute - bucket.count,
            reset_epoch,
            retry_after: 0,
        }
    }

    pub fn check(&self, identifier: &str) -> RateDecision {
        self.check_at(identifier, now_epoch())
    }

    /// Starts the background sweeper evicting idle identifiers. Calling
    /// twice replaces the previous task.
    pub fn start_sweeper(&self) {
        let buckets = self.buckets.clone();
        let interval = self.cleanup_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let horizon = now_epoch() - interval.as_secs() as i64;
                let mut buckets = buckets.lock().expect("rate limit table poisoned");
                buckets.retain(|_, bucket| bucket.last_seen >= horizon);
            }
        });
        let mut sweeper = self.sweeper.lock().expect("sweeper slot poisoned");
        if let Some(old) = sweeper.replace(task) {
            old.abort();
        }
    }

    pub fn stop_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().expect("sweeper slot poisoned");
        if let Some(task) = sweeper.take() {
            task.abort();
        }
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.buckets.lock().expect("rate limit table poisoned").len()
    }

    /// Test/ops hook mirroring what the sweeper does on its tick.
    pub fn sweep_at(&self, now: i64) {
        let horizon = now - self.cleanup_interval.as_secs() as i64;
        let mut buckets = self.buckets.lock().expect("rate limit table poisoned");
        buckets.retain(|_, bucket| bucket.last_seen >= horizon);
    }
}

fn now_epoch() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Caller identifier precedence: `X-API-Key` header, then the full
/// `Authorization` value, then the client IP.
pub fn identifier_from(
    api_key_header: Option<&str>,
    authorization: Option<&str>,
    client_ip: &str,
) -> String {
    if let Some(key) = api_key_header.map(str::trim).filter(|key| !key.is_empty()) {
        return format!("key:{key}");
    }
    if let Some(auth) = authorization.map(str::trim).filter(|auth| !auth.is_empty()) {
        return format!("auth:{auth}");
    }
    format!("ip:{client_ip}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_in_window_rejected_at_limit_one() {
        let limiter = RateLimiter::new(1, Duration::from_secs(300));
        let now = 1_700_000_000;
        let first = limiter.check_at("k", now);
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let second = limiter.check_at("k", now + 5);
        assert!(!second.allowed);
        assert!(second.retry_after <= 60);
        assert_eq!(second.reset_epoch, now + 60);
    }

    #[test]
    fn window_resets_after_sixty_seconds() {
        let limiter = RateLimiter::new(1, Duration::from_secs(300));
        let now = 1_700_000_000;
        assert!(limiter.check_at("k", now).allowed);
        assert!(!limiter.check_at("k", now + 59).allowed);
        assert!(limiter.check_at("k", now + 60).allowed);
    }

    #[test]
    fn identifiers_are_isolated() {
        let limiter = RateLimiter::new(1, Duration::from_secs(300));
        let now = 1_700_000_000;
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
    }

    #[test]
    fn sweep_evicts_idle_buckets_only() {
        let limiter = RateLimiter::new(10, Duration::from_secs(300));
        let now = 1_700_000_000;
        limiter.check_at("old", now);
        limiter.check_at("fresh", now + 400);
        limiter.sweep_at(now + 400);
        assert_eq!(limiter.tracked_identifiers(), 1);
    }

    #[test]
    fn identifier_precedence() {
        assert_eq!(
            identifier_from(Some("k1"), Some("Bearer t"), "1.2.3.4"),
            "key:k1"
        );
        assert_eq!(
            identifier_from(None, Some("Bearer t"), "1.2.3.4"),
            "auth:Bearer t"
        );
        assert_eq!(identifier_from(None, None, "1.2.3.4"), "ip:1.2.3.4");
    }
}
