//! In-memory simulated graph engine for deterministic testing.
//!
//! A `SimulatedGraph` stands in for one engine instance. It records every
//! statement, keeps a change log of write statements, and supports fault
//! injection so tests can drive every failure branch of the router and the
//! replication job.

#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meridian_core::{AccessMode, SequenceNumber, ShardConfig};
use tracing::debug;

use crate::driver::{DriverFactory, GraphDriver, GraphSession};
use crate::error::{DriverError, DriverResult};
use crate::value::{ChangeEntry, QueryParams, QueryResult, Record, ResultSummary};

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault injection switches for a simulated graph.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SimulatedFaultConfig {
    /// Refuse to open new connections.
    pub refuse_connections: bool,
    /// Open connections but fail the connectivity check.
    pub fail_connectivity: bool,
    /// Fail every statement.
    pub fail_queries: bool,
    /// Panic inside every statement.
    pub panic_on_query: bool,
    /// Fail session and driver close.
    pub fail_close: bool,
    /// Reject every change batch.
    pub fail_apply: bool,
    /// Delay before every statement completes.
    pub query_delay: Option<Duration>,
}

impl SimulatedFaultConfig {
    /// No faults.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            refuse_connections: false,
            fail_connectivity: false,
            fail_queries: false,
            panic_on_query: false,
            fail_close: false,
            fail_apply: false,
            query_delay: None,
        }
    }

    /// Refuses new connections.
    #[must_use]
    pub const fn with_refuse_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// Fails the connectivity check.
    #[must_use]
    pub const fn with_fail_connectivity(mut self) -> Self {
        self.fail_connectivity = true;
        self
    }

    /// Fails every statement.
    #[must_use]
    pub const fn with_fail_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    /// Panics inside every statement.
    #[must_use]
    pub const fn with_panic_on_query(mut self) -> Self {
        self.panic_on_query = true;
        self
    }

    /// Fails session and driver close.
    #[must_use]
    pub const fn with_fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Rejects every change batch.
    #[must_use]
    pub const fn with_fail_apply(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    /// Delays every statement.
    #[must_use]
    pub const fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }
}

// -----------------------------------------------------------------------------
// SimulatedGraph
// -----------------------------------------------------------------------------

/// A statement the simulated engine executed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    /// Statement text.
    pub query: String,
    /// Parameters.
    pub params: QueryParams,
    /// Session access mode.
    pub access_mode: AccessMode,
}

#[derive(Debug, Default)]
struct GraphState {
    executed: Vec<ExecutedStatement>,
    change_log: Vec<ChangeEntry>,
    applied: Vec<ChangeEntry>,
    response: Vec<Record>,
}

/// One simulated engine instance.
///
/// Clones share the same state (via `Arc`), so a test can keep a handle
/// and inspect what the router did through a driver.
#[derive(Debug, Clone)]
pub struct SimulatedGraph {
    uri: String,
    state: Arc<Mutex<GraphState>>,
    fault_config: Arc<Mutex<SimulatedFaultConfig>>,
    connects: Arc<AtomicU64>,
    sessions_opened: Arc<AtomicU64>,
    sessions_closed: Arc<AtomicU64>,
    drivers_closed: Arc<AtomicU64>,
}

impl SimulatedGraph {
    /// Creates an empty graph reachable at `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            state: Arc::new(Mutex::new(GraphState::default())),
            fault_config: Arc::new(Mutex::new(SimulatedFaultConfig::none())),
            connects: Arc::new(AtomicU64::new(0)),
            sessions_opened: Arc::new(AtomicU64::new(0)),
            sessions_closed: Arc::new(AtomicU64::new(0)),
            drivers_closed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the fault configuration for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, SimulatedFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Replaces the fault configuration.
    pub fn set_faults(&self, config: SimulatedFaultConfig) {
        *self.fault_config() = config;
    }

    /// Sets the rows every subsequent statement returns.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn set_response(&self, records: Vec<Record>) {
        self.lock_state().response = records;
    }

    /// Appends a write directly to the change log, as if a client had
    /// written to this engine. Returns the new entry's sequence number.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn record_write(&self, statement: impl Into<String>, params: QueryParams) -> SequenceNumber {
        let mut state = self.lock_state();
        append_change(&mut state, statement.into(), params)
    }

    /// Returns every statement executed so far.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.lock_state().executed.clone()
    }

    /// Returns the change log.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn change_log(&self) -> Vec<ChangeEntry> {
        self.lock_state().change_log.clone()
    }

    /// Returns every change entry applied through replication.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn applied(&self) -> Vec<ChangeEntry> {
        self.lock_state().applied.clone()
    }

    /// Number of successful `connect` calls.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of sessions opened.
    #[must_use]
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Number of sessions closed.
    #[must_use]
    pub fn sessions_closed(&self) -> u64 {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    /// Number of driver `close` calls.
    #[must_use]
    pub fn drivers_closed(&self) -> u64 {
        self.drivers_closed.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GraphState> {
        self.state.lock().expect("graph state lock poisoned")
    }

    fn faults(&self) -> SimulatedFaultConfig {
        self.fault_config().clone()
    }
}

fn append_change(state: &mut GraphState, statement: String, params: QueryParams) -> SequenceNumber {
    let sequence = state
        .change_log
        .last()
        .map_or(SequenceNumber::ZERO, |entry| entry.sequence)
        .next();
    state.change_log.push(ChangeEntry::new(sequence, statement, params));
    sequence
}

// -----------------------------------------------------------------------------
// SimulatedDriver
// -----------------------------------------------------------------------------

/// Driver handle onto a `SimulatedGraph`.
#[derive(Debug)]
pub struct SimulatedDriver {
    graph: SimulatedGraph,
    closed: AtomicBool,
}

impl SimulatedDriver {
    /// Creates a driver for `graph`.
    #[must_use]
    pub const fn new(graph: SimulatedGraph) -> Self {
        Self {
            graph,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed {
                uri: self.graph.uri.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GraphDriver for SimulatedDriver {
    async fn verify_connectivity(&self) -> DriverResult<()> {
        self.ensure_open()?;
        if self.graph.faults().fail_connectivity {
            return Err(DriverError::Connectivity {
                uri: self.graph.uri.clone(),
                message: "simulated: no route to host".to_string(),
            });
        }
        Ok(())
    }

    async fn session(&self, mode: AccessMode) -> DriverResult<Box<dyn GraphSession>> {
        self.ensure_open()?;
        self.graph.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedSession {
            graph: self.graph.clone(),
            mode,
            closed: false,
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.graph.drivers_closed.fetch_add(1, Ordering::SeqCst);
        if self.graph.faults().fail_close {
            return Err(DriverError::Close {
                message: format!("simulated: {} did not release its pool", self.graph.uri),
            });
        }
        Ok(())
    }

    async fn read_changes(
        &self,
        after: SequenceNumber,
        limit: u32,
    ) -> DriverResult<Vec<ChangeEntry>> {
        self.ensure_open()?;
        let state = self.graph.lock_state();
        Ok(state
            .change_log
            .iter()
            .filter(|entry| entry.sequence > after)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn apply_changes(&self, entries: &[ChangeEntry]) -> DriverResult<()> {
        self.ensure_open()?;
        if self.graph.faults().fail_apply {
            return Err(DriverError::Apply {
                entries: entries.len(),
                message: "simulated: transaction rolled back".to_string(),
            });
        }

        let mut state = self.graph.lock_state();
        for entry in entries {
            state.executed.push(ExecutedStatement {
                query: entry.statement.clone(),
                params: entry.params.clone(),
                access_mode: AccessMode::Write,
            });
            state.applied.push(entry.clone());
        }
        debug!(uri = %self.graph.uri, count = entries.len(), "applied change batch");
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// SimulatedSession
// -----------------------------------------------------------------------------

struct SimulatedSession {
    graph: SimulatedGraph,
    mode: AccessMode,
    closed: bool,
}

#[async_trait]
impl GraphSession for SimulatedSession {
    fn access_mode(&self) -> AccessMode {
        self.mode
    }

    async fn run(&mut self, query: &str, params: &QueryParams) -> DriverResult<QueryResult> {
        if self.closed {
            return Err(DriverError::Query {
                message: "session already closed".to_string(),
            });
        }

        let faults = self.graph.faults();
        if let Some(delay) = faults.query_delay {
            tokio::time::sleep(delay).await;
        }
        assert!(!faults.panic_on_query, "simulated engine crash on {}", self.graph.uri);
        if faults.fail_queries {
            return Err(DriverError::Query {
                message: format!("simulated failure on {}", self.graph.uri),
            });
        }

        let mut state = self.graph.lock_state();
        state.executed.push(ExecutedStatement {
            query: query.to_string(),
            params: params.clone(),
            access_mode: self.mode,
        });
        let records_written = if self.mode.is_write() {
            append_change(&mut state, query.to_string(), params.clone());
            1
        } else {
            0
        };

        Ok(QueryResult {
            records: state.response.clone(),
            summary: ResultSummary {
                statement: query.to_string(),
                access_mode: self.mode,
                records_written,
            },
        })
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.graph.sessions_closed.fetch_add(1, Ordering::SeqCst);
        if self.graph.faults().fail_close {
            return Err(DriverError::Close {
                message: format!("simulated: session on {} did not close cleanly", self.graph.uri),
            });
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// SimulatedDriverFactory
// -----------------------------------------------------------------------------

/// Factory that resolves URIs to `SimulatedGraph`s, creating them on first
/// use.
#[derive(Debug, Default)]
pub struct SimulatedDriverFactory {
    graphs: Mutex<HashMap<String, SimulatedGraph>>,
}

impl SimulatedDriverFactory {
    /// Creates a factory with no graphs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the graph at `uri`, creating it if needed.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn graph(&self, uri: &str) -> SimulatedGraph {
        let mut graphs = self.graphs.lock().expect("graphs lock poisoned");
        graphs
            .entry(uri.to_string())
            .or_insert_with(|| SimulatedGraph::new(uri))
            .clone()
    }
}

#[async_trait]
impl DriverFactory for SimulatedDriverFactory {
    async fn connect(&self, config: &ShardConfig) -> DriverResult<Arc<dyn GraphDriver>> {
        let graph = self.graph(&config.uri);
        if graph.faults().refuse_connections {
            return Err(DriverError::Connection {
                uri: config.uri.clone(),
                message: "simulated: connection refused".to_string(),
            });
        }
        graph.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatedDriver::new(graph)))
    }
}
