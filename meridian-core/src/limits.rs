//! Explicit bounds on shard topology and background work.
//!
//! Every table and batch has a maximum size so a misconfigured caller
//! cannot grow process state without bound.

use std::time::Duration;

/// Maximum number of shards a single registry will hold.
pub const SHARDS_MAX: usize = 1_024;

/// Maximum length of a shard identifier in bytes.
pub const SHARD_ID_LENGTH_MAX: usize = 128;

/// Maximum number of change-log entries applied to an edge shard per pass.
pub const REPLICATION_BATCH_MAX: u32 = 10_000;

/// Default number of change-log entries applied per pass.
pub const REPLICATION_BATCH_DEFAULT: u32 = 500;

/// Shortest accepted replication interval.
pub const REPLICATION_INTERVAL_MIN: Duration = Duration::from_millis(10);

/// Default replication interval.
pub const REPLICATION_INTERVAL_DEFAULT: Duration = Duration::from_secs(30);

/// Maximum number of replica hops a single `execute` may take.
pub const FAILOVER_BUDGET_MAX: u32 = 4;
