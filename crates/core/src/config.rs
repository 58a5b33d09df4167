//! Event processor configuration.
//!
//! Defaults match the long-standing controller values: five requeues before an
//! event is dropped, a five minute mirror resync for platform kinds (30s for
//! skiff's own kinds), and a shared rate limiter that
//! combines per-item exponential backoff (5ms doubling up to 1000s) with a
//! 10 qps / 100 burst token bucket. Every value can be overridden through
//! `SKIFF_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Number of rate-limited requeues allowed after the first failure.
    pub max_requeues: u32,
    /// Interval at which mirrors re-deliver every object as an update.
    pub resync: Duration,
    /// Resync interval for `skiff.dev` kinds.
    pub crd_resync: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Sustained rate of the shared token bucket.
    pub queue_qps: f64,
    pub queue_burst: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_requeues: 5,
            resync: Duration::from_secs(300),
            crd_resync: Duration::from_secs(30),
            retry_base_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_secs(1000),
            queue_qps: 10.0,
            queue_burst: 100,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparsable value");
            None
        }
    }
}

impl ProcessorConfig {
    /// Defaults overridden by any `SKIFF_*` variables present in the environment.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_requeues: env_parse("SKIFF_MAX_REQUEUES").unwrap_or(d.max_requeues),
            resync: env_parse::<u64>("SKIFF_RESYNC_SECS").map(Duration::from_secs).unwrap_or(d.resync),
            crd_resync: env_parse::<u64>("SKIFF_CRD_RESYNC_SECS").map(Duration::from_secs).unwrap_or(d.crd_resync),
            retry_base_delay: env_parse::<u64>("SKIFF_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.retry_base_delay),
            retry_max_delay: env_parse::<u64>("SKIFF_RETRY_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.retry_max_delay),
            queue_qps: env_parse::<f64>("SKIFF_QUEUE_QPS").filter(|q| *q > 0.0).unwrap_or(d.queue_qps),
            queue_burst: env_parse("SKIFF_QUEUE_BURST").unwrap_or(d.queue_burst),
        }
    }

    pub fn with_resync(mut self, resync: Duration) -> Self {
        self.resync = resync;
        self
    }

    pub fn with_crd_resync(mut self, crd_resync: Duration) -> Self {
        self.crd_resync = crd_resync;
        self
    }

    pub fn with_max_requeues(mut self, max_requeues: u32) -> Self {
        self.max_requeues = max_requeues;
        self
    }
}
