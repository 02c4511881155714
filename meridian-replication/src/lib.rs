//! Meridian Replication - keeps air-gapped edge shards current.
//!
//! Air-gapped shards never take live traffic. A background job copies the
//! primary's change log to each of them, one bounded batch per pass.
//!
//! # Design Principles
//!
//! - **Log-based**: Edges replay the primary's committed writes in sequence order
//! - **Cursor after apply**: An edge's cursor only moves once its batch is applied
//! - **Per-edge isolation**: One failing edge never stalls the others
//! - **Explicit primary**: Configured, with registration order as the fallback

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod cursor;
mod error;
mod manager;

pub use config::ReplicationConfig;
pub use cursor::{CursorStore, InMemoryCursorStore};
pub use error::{ReplicationError, ReplicationResult};
pub use manager::{EdgeSyncOutcome, ReplicationManager, SkipReason, SyncReport};
