//! Replication error types.

use meridian_core::{ConfigError, ShardId};
use meridian_driver::DriverError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// Invalid replication configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The edge shard has no live handle.
    #[error("edge shard unavailable: {shard_id}")]
    EdgeUnavailable {
        /// The edge shard.
        shard_id: ShardId,
    },

    /// Reading from the primary or applying to the edge failed.
    #[error("shard {shard_id}: {source}")]
    Driver {
        /// The shard the driver call was made against.
        shard_id: ShardId,
        /// Underlying driver error.
        #[source]
        source: DriverError,
    },

    /// The cursor store failed.
    #[error("cursor store error for edge {edge}: {message}")]
    CursorStore {
        /// The edge whose cursor was being read or written.
        edge: ShardId,
        /// Error message.
        message: String,
    },
}
