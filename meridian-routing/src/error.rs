//! Routing error types.

use meridian_core::{Capability, ConfigError, ShardId};
use meridian_driver::DriverError;
use thiserror::Error;

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Errors that can occur while routing a statement to a shard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The resolved shard has no live connection handle.
    #[error("shard unavailable: {shard_id}")]
    ShardUnavailable {
        /// The shard the strategy resolved.
        shard_id: ShardId,
    },

    /// The strategy had no candidate shards to place the query on.
    #[error("no shards available for placement")]
    NoShardsAvailable,

    /// The engine failed the statement or the session.
    #[error("shard {shard_id}: {source}")]
    Driver {
        /// The shard that failed.
        shard_id: ShardId,
        /// Underlying driver error.
        #[source]
        source: DriverError,
    },

    /// The session panicked while running the statement.
    #[error("session on shard {shard_id} panicked: {message}")]
    SessionPanicked {
        /// The shard whose session panicked.
        shard_id: ShardId,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The shard does not support a capability the statement needs.
    #[error("shard {shard_id} does not support {capability}")]
    CapabilityMissing {
        /// The shard that was targeted.
        shard_id: ShardId,
        /// The missing capability.
        capability: Capability,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RoutingError {
    /// Wraps a driver error with the shard it came from.
    #[must_use]
    pub fn driver(shard_id: &ShardId, source: DriverError) -> Self {
        Self::Driver {
            shard_id: shard_id.clone(),
            source,
        }
    }

    /// Returns the shard the error is attributed to, if any.
    #[must_use]
    pub const fn shard_id(&self) -> Option<&ShardId> {
        match self {
            Self::ShardUnavailable { shard_id }
            | Self::Driver { shard_id, .. }
            | Self::SessionPanicked { shard_id, .. }
            | Self::CapabilityMissing { shard_id, .. } => Some(shard_id),
            Self::NoShardsAvailable | Self::Config(_) => None,
        }
    }
}
