//! Syncer configuration.

use std::env;
use std::time::Duration;

use crate::backoff::ExponentialBackoff;

/// Tunables for a syncer instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerConfig {
    /// Number of concurrent worker loops (queue-backed syncer only)
    pub workers: usize,
    /// Failed attempts allowed to be retried before a key is dropped
    pub retry_limit: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Upper bound for any retry delay
    pub backoff_max: Duration,
    /// Interval for re-enqueueing every known key, if any
    pub resync_period: Option<Duration>,
    /// Number of sync records kept for inspection
    pub ledger_capacity: usize,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            retry_limit: 5,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1),
            resync_period: None,
            ledger_capacity: 256,
        }
    }
}

impl SyncerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    pub fn with_ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger_capacity = capacity;
        self
    }

    /// The backoff policy described by `backoff_base` and `backoff_max`.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_base, self.backoff_max)
    }

    /// Reject combinations no syncer can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.ledger_capacity == 0 {
            return Err(ConfigError::EmptyLedger);
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::BackoffOrder);
        }
        if self.resync_period == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue("SYNCER_RESYNC_SECS"));
        }
        Ok(())
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let workers = parse_var("SYNCER_WORKERS")?.unwrap_or(defaults.workers);
        let retry_limit = parse_var("SYNCER_RETRY_LIMIT")?.unwrap_or(defaults.retry_limit);
        let backoff_base = parse_var("SYNCER_BACKOFF_BASE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_base);
        let backoff_max = parse_var("SYNCER_BACKOFF_MAX_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_max);
        let resync_period = parse_var("SYNCER_RESYNC_SECS")?.map(Duration::from_secs);
        let ledger_capacity =
            parse_var("SYNCER_LEDGER_CAPACITY")?.unwrap_or(defaults.ledger_capacity);

        let config = Self {
            workers,
            retry_limit,
            backoff_base,
            backoff_max,
            resync_period,
            ledger_capacity,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),

    #[error("at least one worker is required")]
    NoWorkers,

    #[error("ledger capacity must be at least 1")]
    EmptyLedger,

    #[error("backoff base must not exceed backoff max")]
    BackoffOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SyncerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_workers() {
        let config = SyncerConfig::default().with_workers(0);
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));
    }

    #[test]
    fn rejects_empty_ledger() {
        let config = SyncerConfig::default().with_ledger_capacity(0);
        assert_eq!(config.validate(), Err(ConfigError::EmptyLedger));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let config =
            SyncerConfig::default().with_backoff(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(config.validate(), Err(ConfigError::BackoffOrder));
    }

    #[test]
    fn rejects_zero_resync() {
        let config = SyncerConfig::default().with_resync_period(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let config = SyncerConfig::default()
            .with_workers(4)
            .with_retry_limit(2)
            .with_resync_period(Duration::from_secs(30))
            .with_ledger_capacity(10);
        assert_eq!(config.workers, 4);
        assert_eq!(config.retry_limit, 2);
        assert_eq!(config.resync_period, Some(Duration::from_secs(30)));
        assert_eq!(config.ledger_capacity, 10);
    }
}
