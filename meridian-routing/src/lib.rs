//! Meridian Routing - shard registry, placement, and query routing.
//!
//! This crate maps a caller's `QueryContext` to one shard and runs the
//! statement there, or reaches every shard at once for administrative and
//! cross-shard work.
//!
//! # Design (`TigerStyle`)
//!
//! - **Injected registry**: No global state; tests build isolated registries
//! - **Deterministic placement**: Fixed-seed xxh3 over sorted candidates
//! - **Fail fast on one shard**: `execute` never silently picks another shard
//! - **Fault-isolated fan-out**: Broadcast and admin fan-out report per shard
//! - **Explicit limits**: Registry size and failover depth are bounded

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod admin;
mod error;
mod registry;
mod router;
mod strategy;

pub use admin::{
    AdminFanout, AdminStatement, FanoutEntry, FanoutReport, FanoutStatus, SimilarityFunction,
    VectorIndexConfig, VECTOR_DIMENSIONS_MAX,
};
pub use error::{RoutingError, RoutingResult};
pub use registry::{RegistrationOutcome, ShardRegistry};
pub use router::{BroadcastReport, GraphRouter, RouterConfig, ShardOutcome};
pub use strategy::{
    HashPartitionStrategy, LocalityAwarePartitionStrategy, PartitionStrategy,
    StaticPartitionStrategy,
};
