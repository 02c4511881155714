//! Replication configuration.

use std::time::Duration;

use meridian_core::limits::{
    REPLICATION_BATCH_DEFAULT, REPLICATION_BATCH_MAX, REPLICATION_INTERVAL_DEFAULT,
    REPLICATION_INTERVAL_MIN,
};
use meridian_core::{ConfigError, ShardId};

/// Configuration for the replication job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Time between sync passes.
    pub interval: Duration,
    /// Explicit primary. When unset, the first registered shard that is not
    /// air-gapped is used.
    pub primary: Option<ShardId>,
    /// Maximum change entries applied to one edge per pass.
    pub batch_limit: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            interval: REPLICATION_INTERVAL_DEFAULT,
            primary: None,
            batch_limit: REPLICATION_BATCH_DEFAULT,
        }
    }
}

impl ReplicationConfig {
    /// Short interval and small batches for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(20),
            primary: None,
            batch_limit: 100,
        }
    }

    /// Sets the interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Designates the primary shard.
    #[must_use]
    pub fn with_primary(mut self, primary: impl Into<ShardId>) -> Self {
        self.primary = Some(primary.into());
        self
    }

    /// Sets the per-pass batch limit.
    #[must_use]
    pub const fn with_batch_limit(mut self, batch_limit: u32) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the interval is too short or the batch limit is
    /// zero or above `REPLICATION_BATCH_MAX`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(self.interval)?;
        if self.batch_limit == 0 || self.batch_limit > REPLICATION_BATCH_MAX {
            return Err(ConfigError::OutOfRange {
                field: "batch_limit",
                message: format!("{} not in 1..={REPLICATION_BATCH_MAX}", self.batch_limit),
            });
        }
        Ok(())
    }
}

pub(crate) fn validate_interval(interval: Duration) -> Result<(), ConfigError> {
    if interval < REPLICATION_INTERVAL_MIN {
        return Err(ConfigError::OutOfRange {
            field: "interval",
            message: format!(
                "{interval:?} is below the minimum of {REPLICATION_INTERVAL_MIN:?}"
            ),
        });
    }
    Ok(())
}
