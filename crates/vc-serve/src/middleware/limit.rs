use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Per-IP token bucket. Buckets refill continuously at `rate` tokens per
/// second up to `burst`.
pub struct RateLimiter {
    visitors: Mutex<HashMap<IpAddr, Visitor>>,
    rate: f64,
    burst: f64,
    cleanup_interval: Duration,
}

struct Visitor {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub rate: f64,
    pub burst: u32,
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // Generous for normal UI use, tight enough to blunt abuse.
        Self {
            rate: 10.0,
            burst: 20,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            visitors: Mutex::new(HashMap::new()),
            rate: config.rate,
            burst: config.burst as f64,
            cleanup_interval: config.cleanup_interval,
        }
    }

    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut visitors = self.visitors.lock();
        let visitor = visitors.entry(ip).or_insert(Visitor {
            tokens: self.burst,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(visitor.last_refill);
        visitor.tokens = (visitor.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        visitor.last_refill = now;
        visitor.last_seen = now;

        if visitor.tokens >= 1.0 {
            visitor.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn cleanup_idle(&self, now: Instant) {
        let threshold = self.cleanup_interval * 2;
        self.visitors
            .lock()
            .retain(|_, visitor| now.saturating_duration_since(visitor.last_seen) < threshold);
    }

    /// Periodic idle-bucket cleanup; runs until shutdown fires.
    pub async fn cleanup_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.cleanup_idle(Instant::now()),
                _ = shutdown.changed() => return,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthFailureLimiterConfig {
    pub max_failures: u32,
    pub window: Duration,
    pub lockout: Duration,
}

impl Default for AuthFailureLimiterConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window: Duration::from_secs(5 * 60),
            lockout: Duration::from_secs(15 * 60),
        }
    }
}

struct FailureRecord {
    count: u32,
    first_at: DateTime<Utc>,
    locked_at: Option<DateTime<Utc>>,
}

/// Per-IP authentication failure counter with lockout. Clock-driven so the
/// window and lockout math is testable.
pub struct AuthFailureLimiter {
    failures: Mutex<HashMap<IpAddr, FailureRecord>>,
    config: AuthFailureLimiterConfig,
}

impl AuthFailureLimiter {
    pub fn new(config: AuthFailureLimiterConfig) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.window).unwrap_or_else(|_| chrono::Duration::minutes(5))
    }

    fn lockout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.lockout)
            .unwrap_or_else(|_| chrono::Duration::minutes(15))
    }

    pub fn is_locked(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        let failures = self.failures.lock();
        match failures.get(&ip).and_then(|record| record.locked_at) {
            Some(locked_at) => now - locked_at < self.lockout(),
            None => false,
        }
    }

    /// Record one failure. Returns remaining attempts, or -1 when the IP is
    /// now locked out.
    pub fn record_failure(&self, ip: IpAddr, now: DateTime<Utc>) -> i32 {
        let mut failures = self.failures.lock();
        let max = self.config.max_failures;

        let record = failures.entry(ip).or_insert(FailureRecord {
            count: 0,
            first_at: now,
            locked_at: None,
        });

        // Stale window: start counting fresh.
        if now - record.first_at > self.window() {
            record.count = 0;
            record.first_at = now;
            record.locked_at = None;
        }

        record.count += 1;
        if record.count >= max {
            record.locked_at = Some(now);
            return -1;
        }
        (max - record.count) as i32
    }

    pub fn record_success(&self, ip: IpAddr) {
        self.failures.lock().remove(&ip);
    }

    pub fn lockout_seconds_remaining(&self, ip: IpAddr, now: DateTime<Utc>) -> u64 {
        let failures = self.failures.lock();
        let Some(locked_at) = failures.get(&ip).and_then(|record| record.locked_at) else {
            return 0;
        };
        let remaining = self.lockout() - (now - locked_at);
        if remaining <= chrono::Duration::zero() {
            0
        } else {
            remaining.num_seconds() as u64 + 1
        }
    }
}
