//! Driver error types.

use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by a graph engine driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// A connection could not be opened.
    #[error("connection to {uri} failed: {message}")]
    Connection {
        /// The URI that was dialled.
        uri: String,
        /// Error message.
        message: String,
    },

    /// The connection opened but the engine did not answer a liveness check.
    #[error("connectivity check against {uri} failed: {message}")]
    Connectivity {
        /// The URI that was checked.
        uri: String,
        /// Error message.
        message: String,
    },

    /// The engine rejected or failed a statement.
    #[error("query failed: {message}")]
    Query {
        /// Error message.
        message: String,
    },

    /// A change batch could not be applied; nothing from the batch was kept.
    #[error("apply of {entries} change(s) failed: {message}")]
    Apply {
        /// Number of entries in the rejected batch.
        entries: usize,
        /// Error message.
        message: String,
    },

    /// Closing a session or driver failed.
    #[error("close failed: {message}")]
    Close {
        /// Error message.
        message: String,
    },

    /// The driver was already closed.
    #[error("driver for {uri} is closed")]
    Closed {
        /// The URI of the closed driver.
        uri: String,
    },
}
