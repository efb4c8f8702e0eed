//! Per-owner token bucket in front of the broker.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use tw_types::Clock;

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum burst of broker calls.
    pub capacity: u32,
    /// Tokens restored per second.
    pub refill_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 1.0,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Token buckets keyed by owner. On starvation the executor defers the
/// order to the next check instead of failing it.
pub struct OwnerRateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl OwnerRateLimiter {
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `owner`. Returns `false` when the bucket is dry.
    pub fn try_acquire(&self, owner: &str) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(owner.to_string()).or_insert(Bucket {
            tokens: self.config.capacity as f64,
            last_refill: now,
        });

        let elapsed = (now - bucket.last_refill)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_second)
            .min(self.config.capacity as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
