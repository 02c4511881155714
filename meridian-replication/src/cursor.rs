//! Replication cursors - the last primary sequence applied to each edge.
//!
//! Cursors are keyed by `(primary, edge)`. Positions in one primary's
//! change log mean nothing in another's, so switching primaries starts the
//! edge from zero against the new log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use meridian_core::{SequenceNumber, ShardId};

use crate::error::{ReplicationError, ReplicationResult};

/// Persistent store for replication cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Loads the cursor for `edge` against `primary`.
    ///
    /// Returns `SequenceNumber::ZERO` if nothing has been applied yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn load(&self, primary: &ShardId, edge: &ShardId) -> ReplicationResult<SequenceNumber>;

    /// Stores the cursor for `edge` against `primary`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn store(
        &self,
        primary: &ShardId,
        edge: &ShardId,
        cursor: SequenceNumber,
    ) -> ReplicationResult<()>;
}

/// Process-local cursor store.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<(ShardId, ShardId), SequenceNumber>>,
    fail_writes: AtomicBool,
}

impl InMemoryCursorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored cursor, if any.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn get(&self, primary: &ShardId, edge: &ShardId) -> Option<SequenceNumber> {
        self.cursors
            .lock()
            .expect("cursor lock poisoned")
            .get(&(primary.clone(), edge.clone()))
            .copied()
    }

    /// Makes every subsequent `store` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, primary: &ShardId, edge: &ShardId) -> ReplicationResult<SequenceNumber> {
        Ok(self.get(primary, edge).unwrap_or(SequenceNumber::ZERO))
    }

    async fn store(
        &self,
        primary: &ShardId,
        edge: &ShardId,
        cursor: SequenceNumber,
    ) -> ReplicationResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ReplicationError::CursorStore {
                edge: edge.clone(),
                message: "cursor store is read-only".to_string(),
            });
        }
        self.cursors
            .lock()
            .expect("cursor lock poisoned")
            .insert((primary.clone(), edge.clone()), cursor);
        Ok(())
    }
}
