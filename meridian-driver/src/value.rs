//! Statement parameters, results, and change-log entries.

use std::collections::BTreeMap;

use meridian_core::{AccessMode, SequenceNumber};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named statement parameters.
pub type QueryParams = BTreeMap<String, Value>;

/// One result row, keyed by column name.
pub type Record = BTreeMap<String, Value>;

/// Summary the engine reports alongside a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// The statement that ran.
    pub statement: String,
    /// Access mode of the session it ran in.
    pub access_mode: AccessMode,
    /// Number of change-log entries the statement produced.
    pub records_written: u64,
}

/// Rows plus summary returned by one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result rows.
    pub records: Vec<Record>,
    /// Execution summary.
    pub summary: ResultSummary,
}

impl QueryResult {
    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One committed write in a shard's change log.
///
/// Entries are applied to air-gapped shards in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Position in the originating shard's log.
    pub sequence: SequenceNumber,
    /// The write statement.
    pub statement: String,
    /// Its parameters.
    pub params: QueryParams,
}

impl ChangeEntry {
    /// Creates a change entry.
    #[must_use]
    pub fn new(sequence: SequenceNumber, statement: impl Into<String>, params: QueryParams) -> Self {
        Self {
            sequence,
            statement: statement.into(),
            params,
        }
    }
}
