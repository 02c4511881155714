//! Graph engine driver contract.
//!
//! The routing layer never talks to a graph engine directly; it goes
//! through these three traits so the engine can be swapped (or simulated)
//! without touching the router.

use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::{AccessMode, SequenceNumber, ShardConfig};

use crate::error::DriverResult;
use crate::value::{ChangeEntry, QueryParams, QueryResult};

// -----------------------------------------------------------------------------
// DriverFactory
// -----------------------------------------------------------------------------

/// Opens connections to graph engine instances.
///
/// Used only at registration time.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Opens a driver for the shard described by `config`.
    ///
    /// Opening does not imply the engine is reachable; callers verify
    /// with [`GraphDriver::verify_connectivity`] before trusting the handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is unusable or the connection is refused.
    async fn connect(&self, config: &ShardConfig) -> DriverResult<Arc<dyn GraphDriver>>;
}

// -----------------------------------------------------------------------------
// GraphDriver
// -----------------------------------------------------------------------------

/// A long-lived, shareable connection to one graph engine instance.
///
/// Implementations must be `Send + Sync`: one handle serves every
/// concurrent caller routed to its shard.
#[async_trait]
pub trait GraphDriver: Send + Sync {
    /// Round-trips to the engine to prove the connection works.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine does not answer.
    async fn verify_connectivity(&self) -> DriverResult<()>;

    /// Opens a session in the given access mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is closed or the engine refuses.
    async fn session(&self, mode: AccessMode) -> DriverResult<Box<dyn GraphSession>>;

    /// Closes the driver and releases its connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool could not be shut down cleanly.
    async fn close(&self) -> DriverResult<()>;

    /// Reads up to `limit` change-log entries with sequence `> after`,
    /// in sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log cannot be read.
    async fn read_changes(
        &self,
        after: SequenceNumber,
        limit: u32,
    ) -> DriverResult<Vec<ChangeEntry>>;

    /// Applies a batch of change entries in one transaction.
    ///
    /// Either every entry is applied or none is.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction was rolled back.
    async fn apply_changes(&self, entries: &[ChangeEntry]) -> DriverResult<()>;
}

// -----------------------------------------------------------------------------
// GraphSession
// -----------------------------------------------------------------------------

/// A short-lived session scoped to one driver.
///
/// Statements issued on the same session run in issue order. Callers must
/// call [`GraphSession::close`] on every exit path.
#[async_trait]
pub trait GraphSession: Send {
    /// Access mode the session was opened with.
    fn access_mode(&self) -> AccessMode;

    /// Runs one statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects or fails the statement.
    async fn run(&mut self, query: &str, params: &QueryParams) -> DriverResult<QueryResult>;

    /// Closes the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not be released cleanly.
    async fn close(&mut self) -> DriverResult<()>;
}
