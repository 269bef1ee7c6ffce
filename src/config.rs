//! Configuration consumed by the sink and the transaction executor.
//!
//! Every section deserializes from JSON with defaults for missing keys; durations are plain
//! millisecond integers:
//!
//! ```rust
//! use batchline::config::CoreConfig;
//! use std::time::Duration;
//!
//! let cfg = CoreConfig::from_json_str(r#"{
//!     "service": "db-service",
//!     "logs": { "max_batch_size": 50, "flush_interval_ms": 2000 },
//!     "retry": { "max_attempts": 5 }
//! }"#).unwrap();
//! assert_eq!(cfg.logs.max_batch_size, 50);
//! assert_eq!(cfg.logs.flush_interval, Duration::from_secs(2));
//! assert_eq!(cfg.events.max_batch_size, 100);
//! assert_eq!(cfg.retry.max_attempts, 5);
//! ```

use crate::transaction::{TransactionExecutorBuilder, TransactionStore};
use crate::{Backoff, BackoffError, Jitter};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Invalid or unreadable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_batch_size must be >= 1")]
    ZeroBatchSize,
    #[error("flush_interval must be greater than zero")]
    ZeroFlushInterval,
    #[error("queue_capacity must be >= 1")]
    ZeroQueueCapacity,
    #[error("max_attempts must be >= 1")]
    ZeroAttempts,
    #[error("invalid backoff: {0}")]
    Backoff(#[from] BackoffError),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Batching sink parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Buffer length that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Period of the time-based flush.
    #[serde(rename = "flush_interval_ms", with = "millis")]
    pub flush_interval: Duration,
    /// Slots in the producer queue; submissions beyond it are dropped.
    pub queue_capacity: usize,
}

impl SinkConfig {
    pub fn new(max_batch_size: usize, flush_interval: Duration) -> Self {
        Self { max_batch_size, flush_interval, ..Self::default() }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Transaction retry parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, first try included.
    pub max_attempts: usize,
    #[serde(rename = "backoff_base_ms", with = "millis")]
    pub backoff_base: Duration,
    #[serde(rename = "backoff_max_ms", with = "opt_millis", skip_serializing_if = "Option::is_none")]
    pub backoff_max: Option<Duration>,
    pub jitter: Jitter,
}

impl RetryConfig {
    /// Exponential schedule from `backoff_base`, capped at `backoff_max` when set.
    pub fn backoff(&self) -> Result<Backoff, ConfigError> {
        let backoff = Backoff::exponential(self.backoff_base);
        Ok(match self.backoff_max {
            Some(max) => backoff.with_max(max)?,
            None => backoff,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        self.backoff().map(|_| ())
    }

    /// Executor builder preloaded with these settings.
    pub fn executor_builder<S>(&self, store: S) -> Result<TransactionExecutorBuilder<S>, ConfigError>
    where
        S: TransactionStore,
    {
        self.validate()?;
        Ok(TransactionExecutorBuilder::new(store)
            .max_attempts(self.max_attempts)
            .backoff(self.backoff()?)
            .with_jitter(self.jitter))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: None,
            jitter: Jitter::None,
        }
    }
}

/// Everything a service process needs: a log sink, a notification sink and retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Name stamped on emitted records.
    pub service: String,
    pub logs: SinkConfig,
    pub events: SinkConfig,
    pub retry: RetryConfig,
}

impl CoreConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logs.validate()?;
        self.events.validate()?;
        self.retry.validate()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::millis::serialize(d, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
