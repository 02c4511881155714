//! Graph router - single-shard execution and scatter-gather broadcast.
//!
//! `execute` resolves exactly one shard through the active strategy and
//! fails fast when it is unavailable. `broadcast` reaches every registered
//! shard concurrently and reports each outcome separately; it never fails
//! as a whole.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use meridian_core::limits::FAILOVER_BUDGET_MAX;
use meridian_core::{AccessMode, ConfigError, QueryContext, ShardId};
use meridian_driver::{
    DriverError, DriverResult, GraphDriver, GraphSession, QueryParams, QueryResult,
};
use tracing::{debug, error, info, warn};

use crate::error::{RoutingError, RoutingResult};
use crate::registry::ShardRegistry;
use crate::strategy::PartitionStrategy;

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Router configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterConfig {
    /// How many replica hops `execute` may take when the resolved shard has
    /// no live handle. Zero disables failover.
    pub failover_budget: u32,
}

impl RouterConfig {
    /// Sets the failover budget.
    #[must_use]
    pub const fn with_failover_budget(mut self, budget: u32) -> Self {
        self.failover_budget = budget;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the failover budget exceeds `FAILOVER_BUDGET_MAX`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failover_budget > FAILOVER_BUDGET_MAX {
            return Err(ConfigError::OutOfRange {
                field: "failover_budget",
                message: format!(
                    "{} exceeds maximum of {FAILOVER_BUDGET_MAX}",
                    self.failover_budget
                ),
            });
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Broadcast results
// -----------------------------------------------------------------------------

/// Outcome of one shard's part in a broadcast.
#[derive(Debug, Clone)]
pub struct ShardOutcome {
    /// The shard.
    pub shard_id: ShardId,
    /// Its result or the reason it failed.
    pub result: RoutingResult<QueryResult>,
    /// Time spent on this shard.
    pub elapsed: Duration,
}

impl ShardOutcome {
    /// Returns true if the shard succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-shard outcomes of a broadcast, in registration order.
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    /// One outcome per shard that was registered when the broadcast began.
    pub outcomes: Vec<ShardOutcome>,
    /// Wall time of the whole broadcast.
    pub elapsed: Duration,
}

impl BroadcastReport {
    /// Successful shards with their results.
    pub fn successes(&self) -> impl Iterator<Item = (&ShardId, &QueryResult)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|r| (&o.shard_id, r)))
    }

    /// Failed shards with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&ShardId, &RoutingError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.shard_id, e)))
    }

    /// Ids of the shards that failed.
    #[must_use]
    pub fn failed_shards(&self) -> Vec<ShardId> {
        self.failures().map(|(id, _)| id.clone()).collect()
    }

    /// Looks up one shard's outcome.
    #[must_use]
    pub fn outcome(&self, shard_id: &ShardId) -> Option<&ShardOutcome> {
        self.outcomes.iter().find(|o| &o.shard_id == shard_id)
    }

    /// Returns true if some shards failed and some succeeded.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        let failed = self.failures().count();
        failed > 0 && failed < self.outcomes.len()
    }

    /// Returns true if every shard succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(ShardOutcome::is_success)
    }

    /// Number of shards reached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if no shard was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Sessions
// -----------------------------------------------------------------------------

/// Panic payload captured from a session.
pub(crate) type PanicPayload = Box<dyn Any + Send>;

/// Owns an open session until it is closed.
///
/// If the owning future is dropped before `close` completes (a caller's
/// timeout, a cancelled broadcast), `Drop` hands the session to the runtime
/// and closes it there.
struct SessionGuard {
    shard_id: ShardId,
    session: Option<Box<dyn GraphSession>>,
}

impl SessionGuard {
    fn new(shard_id: ShardId, session: Box<dyn GraphSession>) -> Self {
        Self {
            shard_id,
            session: Some(session),
        }
    }

    async fn run(&mut self, query: &str, params: &QueryParams) -> DriverResult<QueryResult> {
        let Some(session) = self.session.as_mut() else {
            return Err(DriverError::Query {
                message: "session already closed".to_string(),
            });
        };
        session.run(query, params).await
    }

    /// Closes the session and logs a failure. The session stays owned by
    /// the guard until the close returns.
    async fn close(mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.close().await {
                warn!(shard_id = %self.shard_id, error = %e, "Failed to close session");
            }
        }
        self.session = None;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let shard_id = self.shard_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(shard_id = %shard_id, "Closing abandoned session in background");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(shard_id = %shard_id, error = %e, "Failed to close abandoned session");
                    }
                });
            }
            Err(_) => {
                warn!(shard_id = %shard_id, "Session dropped outside a runtime and left open");
            }
        }
    }
}

/// Runs one statement in a fresh session and closes the session on every
/// path, including cancellation of the returned future. A panic inside the
/// statement is caught, the session closed, and the payload handed back to
/// the caller.
pub(crate) async fn run_in_session(
    shard_id: &ShardId,
    driver: &dyn GraphDriver,
    mode: AccessMode,
    query: &str,
    params: &QueryParams,
) -> Result<RoutingResult<QueryResult>, PanicPayload> {
    let session = match driver.session(mode).await {
        Ok(session) => session,
        Err(e) => return Ok(Err(RoutingError::driver(shard_id, e))),
    };
    debug!(shard_id = %shard_id, mode = %session.access_mode(), "Session opened");

    let mut guard = SessionGuard::new(shard_id.clone(), session);
    let outcome = AssertUnwindSafe(guard.run(query, params))
        .catch_unwind()
        .await;
    guard.close().await;

    outcome.map(|result| result.map_err(|e| RoutingError::driver(shard_id, e)))
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &PanicPayload) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// -----------------------------------------------------------------------------
// GraphRouter
// -----------------------------------------------------------------------------

/// Routes statements to shards.
pub struct GraphRouter {
    registry: Arc<ShardRegistry>,
    strategy: RwLock<Arc<dyn PartitionStrategy>>,
    config: RouterConfig,
}

impl GraphRouter {
    /// Creates a router with the default configuration (no failover).
    #[must_use]
    pub fn new(registry: Arc<ShardRegistry>, strategy: Arc<dyn PartitionStrategy>) -> Self {
        Self {
            registry,
            strategy: RwLock::new(strategy),
            config: RouterConfig::default(),
        }
    }

    /// Creates a router with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_config(
        registry: Arc<ShardRegistry>,
        strategy: Arc<dyn PartitionStrategy>,
        config: RouterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry,
            strategy: RwLock::new(strategy),
            config,
        })
    }

    /// Swaps the active strategy. Calls already past resolution are
    /// unaffected.
    ///
    /// # Panics
    ///
    /// Panics if the strategy lock is poisoned.
    pub fn set_strategy(&self, strategy: Arc<dyn PartitionStrategy>) {
        info!(strategy = %strategy.describe(), "Partition strategy replaced");
        *self.strategy.write().expect("strategy lock poisoned") = strategy;
    }

    /// Returns the active strategy.
    ///
    /// # Panics
    ///
    /// Panics if the strategy lock is poisoned.
    #[must_use]
    pub fn strategy(&self) -> Arc<dyn PartitionStrategy> {
        self.strategy.read().expect("strategy lock poisoned").clone()
    }

    /// Returns the router configuration.
    #[must_use]
    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Runs a statement on the shard the active strategy selects.
    ///
    /// The session is opened in the mode implied by `context.write` and is
    /// closed before this returns, including when the statement panics
    /// (the panic then continues unwinding).
    ///
    /// # Errors
    ///
    /// - `NoShardsAvailable` if the strategy has nowhere to place the query
    /// - `ShardUnavailable` if the shard (and any replica within the
    ///   failover budget) has no live handle
    /// - `Driver` if the engine fails the session or statement
    pub async fn execute(
        &self,
        query: &str,
        params: &QueryParams,
        context: &QueryContext,
    ) -> RoutingResult<QueryResult> {
        let strategy = self.strategy();
        let resolved = strategy.resolve_shard(context).inspect_err(|e| {
            warn!(strategy = %strategy.describe(), error = %e, "Could not resolve shard");
        })?;
        let (target, driver) = self.resolve_driver(&resolved)?;
        let mode = context.access_mode();

        debug!(
            shard_id = %target,
            mode = %mode,
            vector_search = context.is_vector_search(),
            strategy = %strategy.describe(),
            "Routing query"
        );

        let start = Instant::now();
        match run_in_session(&target, driver.as_ref(), mode, query, params).await {
            Ok(Ok(result)) => {
                debug!(shard_id = %target, elapsed_us = elapsed_us(start), "Query succeeded");
                Ok(result)
            }
            Ok(Err(e)) => {
                warn!(shard_id = %target, error = %e, "Query failed");
                Err(e)
            }
            Err(payload) => {
                error!(
                    shard_id = %target,
                    message = %panic_message(&payload),
                    "Session panicked"
                );
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Runs a statement on every registered shard in write mode.
    pub async fn broadcast(&self, query: &str, params: &QueryParams) -> BroadcastReport {
        self.broadcast_with_mode(query, params, AccessMode::Write).await
    }

    /// Runs a statement on every registered shard concurrently.
    ///
    /// Waits for every shard to settle. A shard with no live handle, a
    /// failing statement, or a panicking session is reported in its own
    /// outcome and does not affect the others.
    pub async fn broadcast_with_mode(
        &self,
        query: &str,
        params: &QueryParams,
        mode: AccessMode,
    ) -> BroadcastReport {
        let start = Instant::now();
        let shards = self.registry.get_all_shards();

        let futures = shards
            .into_iter()
            .map(|shard_id| self.broadcast_one(shard_id, query, params, mode));
        let outcomes = futures::future::join_all(futures).await;

        let report = BroadcastReport {
            outcomes,
            elapsed: start.elapsed(),
        };
        let failed = report.failures().count();
        if failed > 0 {
            info!(
                total = report.len(),
                failed,
                failed_shards = ?report.failed_shards(),
                "Broadcast finished with failures"
            );
        } else {
            debug!(total = report.len(), "Broadcast finished");
        }
        report
    }

    async fn broadcast_one(
        &self,
        shard_id: ShardId,
        query: &str,
        params: &QueryParams,
        mode: AccessMode,
    ) -> ShardOutcome {
        let start = Instant::now();
        let result = match self.registry.get_driver(&shard_id) {
            None => Err(RoutingError::ShardUnavailable {
                shard_id: shard_id.clone(),
            }),
            Some(driver) => {
                match run_in_session(&shard_id, driver.as_ref(), mode, query, params).await {
                    Ok(result) => result,
                    Err(payload) => Err(RoutingError::SessionPanicked {
                        shard_id: shard_id.clone(),
                        message: panic_message(&payload),
                    }),
                }
            }
        };

        match &result {
            Ok(_) => debug!(shard_id = %shard_id, elapsed_us = elapsed_us(start), "Broadcast shard succeeded"),
            Err(e) => warn!(shard_id = %shard_id, error = %e, "Broadcast shard failed"),
        }

        ShardOutcome {
            shard_id,
            result,
            elapsed: start.elapsed(),
        }
    }

    /// Finds a live handle for `shard_id`, following replicas within the
    /// failover budget. The walk stops at an air-gapped replica; edge shards
    /// never take live traffic.
    fn resolve_driver(&self, shard_id: &ShardId) -> RoutingResult<(ShardId, Arc<dyn GraphDriver>)> {
        if let Some(driver) = self.registry.get_driver(shard_id) {
            return Ok((shard_id.clone(), driver));
        }

        let mut current = shard_id.clone();
        let mut budget = self.config.failover_budget;
        while budget > 0 {
            let Some(replica) = self
                .registry
                .get_shard_config(&current)
                .and_then(|config| config.replica)
            else {
                break;
            };
            if self
                .registry
                .get_shard_config(&replica)
                .is_some_and(|config| config.air_gapped)
            {
                warn!(from = %current, to = %replica, "Replica is air-gapped, not failing over");
                break;
            }
            budget -= 1;
            warn!(from = %current, to = %replica, budget_left = budget, "Failing over to replica");
            if let Some(driver) = self.registry.get_driver(&replica) {
                return Ok((replica, driver));
            }
            current = replica;
        }

        warn!(shard_id = %shard_id, "Shard unavailable");
        Err(RoutingError::ShardUnavailable {
            shard_id: shard_id.clone(),
        })
    }
}

impl std::fmt::Debug for GraphRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRouter")
            .field("strategy", &self.strategy().describe())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}
