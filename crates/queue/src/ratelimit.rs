//! Rate limiters deciding how long a failed item waits before it is re-queued.

use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use skiff_core::ProcessorConfig;
use tokio::time::Instant;

/// Per-item backoff policy shared by every producer of a queue.
pub trait RateLimiter<T>: Send + Sync {
    /// Delay before `item` may be processed again. Counts as one requeue.
    fn when(&self, item: &T) -> Duration;
    /// Clear all bookkeeping for `item`.
    fn forget(&self, item: &T);
    /// How many times `item` has been requeued since it was last forgotten.
    fn num_requeues(&self, item: &T) -> u32;
}

/// `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter<T> {
    failures: Mutex<FxHashMap<T, u32>>,
    base: Duration,
    max: Duration,
}

impl<T: Eq + Hash> ItemExponentialFailureRateLimiter<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { failures: Mutex::new(FxHashMap::default()), base, max }
    }
}

impl<T> RateLimiter<T> for ItemExponentialFailureRateLimiter<T>
where
    T: Eq + Hash + Clone + Send + Sync,
{
    fn when(&self, item: &T) -> Duration {
        let exp = {
            let mut failures = self.failures.lock();
            let entry = failures.entry(item.clone()).or_insert(0);
            let exp = *entry;
            *entry = entry.saturating_add(1);
            exp
        };
        // 2^64 already dwarfs any sane max
        let factor = 2f64.powi(exp.min(64) as i32);
        let secs = self.base.as_secs_f64() * factor;
        if !secs.is_finite() || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn forget(&self, item: &T) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token bucket over all items: bursts up to `burst`, then `qps` sustained.
pub struct BucketRateLimiter {
    bucket: Mutex<Bucket>,
    qps: f64,
    burst: f64,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self { bucket: Mutex::new(Bucket { tokens: burst, last: Instant::now() }), qps: qps.max(f64::MIN_POSITIVE), burst }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&self, _item: &T) -> Duration {
        let mut b = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(b.last).as_secs_f64();
        b.tokens = (b.tokens + elapsed * self.qps).min(self.burst);
        b.last = now;
        b.tokens -= 1.0;
        if b.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-b.tokens / self.qps)
        }
    }

    fn forget(&self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Combines limiters: the longest delay and the highest requeue count win.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        self.limiters.iter().map(|l| l.when(item)).max().unwrap_or(Duration::ZERO)
    }

    fn forget(&self, item: &T) {
        for l in &self.limiters {
            l.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters.iter().map(|l| l.num_requeues(item)).max().unwrap_or(0)
    }
}

/// Exponential per-item backoff combined with the overall token bucket.
pub fn default_controller_rate_limiter<T>(cfg: &ProcessorConfig) -> MaxOfRateLimiter<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(cfg.retry_base_delay, cfg.retry_max_delay)),
        Box::new(BucketRateLimiter::new(cfg.queue_qps, cfg.queue_burst)),
    ])
}
