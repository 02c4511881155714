//! Meridian Core - identifiers, shard configuration, and query context.
//!
//! This crate holds the plain data shared by every layer of the shard
//! routing stack. It performs no I/O.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: `ShardId`, `RegionId` and `TenantId` cannot be mixed up
//! - **Explicit limits**: Registry size, batch size and failover depth are bounded
//! - **Immutable configuration**: A `ShardConfig` never changes after registration

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod context;
mod error;
pub mod limits;
mod shard;
mod types;

pub use context::QueryContext;
pub use error::ConfigError;
pub use shard::{Capabilities, Capability, Credentials, ShardConfig};
pub use types::{AccessMode, RegionId, SequenceNumber, ShardId, TenantId};
