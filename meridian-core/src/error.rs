//! Configuration errors.
//!
//! Configuration is validated once, at the edge, before any connection is
//! opened. Everything downstream can assume a validated config.

use std::fmt;

/// Errors found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A shard configuration is unusable.
    InvalidShard {
        /// The offending shard (may be empty).
        shard_id: String,
        /// Error description.
        message: String,
    },
    /// A value is outside its allowed range.
    OutOfRange {
        /// Which setting.
        field: &'static str,
        /// Error description.
        message: String,
    },
    /// A textual value could not be parsed.
    Parse {
        /// The input that failed to parse.
        input: String,
        /// Error description.
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidShard { shard_id, message } => {
                write!(f, "invalid shard '{shard_id}': {message}")
            }
            Self::OutOfRange { field, message } => write!(f, "{field} out of range: {message}"),
            Self::Parse { input, message } => write!(f, "cannot parse '{input}': {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}
