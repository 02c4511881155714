//! Strongly-typed identifiers for Meridian entities.
//!
//! Shard, region, and tenant identifiers are all strings on the wire, so
//! each gets its own newtype to keep a `RegionId` from being passed where a
//! `ShardId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Macro to generate strongly-typed string identifier wrappers.
///
/// Each ID type wraps a `String` and provides:
/// - Type safety (can't mix `ShardId` with `RegionId`)
/// - Debug/Display formatting
/// - Transparent serde representation
macro_rules! define_string_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is the empty string.
            #[inline]
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(ShardId, "shard", "Unique identifier for a shard within a running process.");
define_string_id!(RegionId, "region", "Identifier for a deployment region (e.g. `us-east`).");
define_string_id!(TenantId, "tenant", "Identifier for the tenant a query runs on behalf of.");

/// Position of an entry in a shard's change log.
///
/// Sequence numbers start at 1; `ZERO` means "nothing applied yet".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// The cursor value before any entry has been applied.
    pub const ZERO: Self = Self(0);

    /// Creates a sequence number from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    ///
    /// # Panics
    /// Panics if the sequence number would overflow.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        assert!(self.0 < u64::MAX, "sequence number overflow");
        Self(self.0 + 1)
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq({})", self.0)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session access mode requested from the graph engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Read-only session; may be served by a follower.
    #[default]
    Read,
    /// Read-write session; must be served by the shard leader.
    Write,
}

impl AccessMode {
    /// Maps a caller's write intent to an access mode.
    #[must_use]
    pub const fn from_write_intent(write: bool) -> Self {
        if write {
            Self::Write
        } else {
            Self::Read
        }
    }

    /// Returns true for `Write`.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}
