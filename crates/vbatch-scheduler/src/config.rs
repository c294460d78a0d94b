//! Scheduler configuration.

use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global cap on concurrently executing video units
    pub max_concurrent_units: usize,
    /// Soft cap on concurrently executing units of a single batch
    pub per_job_limit: usize,
    /// Maximum duration of one stage execution; exceeding it counts as a
    /// transient failure
    pub stage_timeout: Duration,
    /// Base delay for retry backoff (doubles each retry)
    pub retry_base_delay: Duration,
    /// Cap on the retry backoff delay
    pub retry_max_delay: Duration,
    /// Lease lifetime; a unit still leased past this is considered
    /// orphaned and requeued
    pub lease_ttl: Duration,
    /// How often expired leases are scanned for
    pub reclaim_interval: Duration,
    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: 4,
            per_job_limit: 2,
            stage_timeout: Duration::from_secs(600), // 10 minutes
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(900), // 15 minutes
            reclaim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_units: env_parse("VBATCH_MAX_CONCURRENT_UNITS")
                .unwrap_or(defaults.max_concurrent_units),
            per_job_limit: env_parse("VBATCH_PER_JOB_LIMIT").unwrap_or(defaults.per_job_limit),
            stage_timeout: env_secs("VBATCH_STAGE_TIMEOUT_SECS")
                .unwrap_or(defaults.stage_timeout),
            retry_base_delay: env_parse("VBATCH_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: env_secs("VBATCH_RETRY_MAX_DELAY_SECS")
                .unwrap_or(defaults.retry_max_delay),
            lease_ttl: env_secs("VBATCH_LEASE_TTL_SECS").unwrap_or(defaults.lease_ttl),
            reclaim_interval: env_secs("VBATCH_RECLAIM_INTERVAL_SECS")
                .unwrap_or(defaults.reclaim_interval),
            shutdown_timeout: env_secs("VBATCH_SHUTDOWN_TIMEOUT_SECS")
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    /// Backoff policy derived from the retry delays.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.retry_base_delay, self.retry_max_delay)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_secs)
}
