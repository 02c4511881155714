//! Replication manager - periodic one-way sync from the primary to every
//! air-gapped edge shard.
//!
//! Each pass reads the primary's change log after the edge's cursor,
//! applies the batch to the edge in one transaction, and only then advances
//! the cursor. A failed apply leaves the cursor where it was, so the same
//! entries are retried on the next pass.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_core::{SequenceNumber, ShardId};
use meridian_driver::GraphDriver;
use meridian_routing::ShardRegistry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{validate_interval, ReplicationConfig};
use crate::cursor::CursorStore;
use crate::error::{ReplicationError, ReplicationResult};

// -----------------------------------------------------------------------------
// Reports
// -----------------------------------------------------------------------------

/// Why a sync pass did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No shard qualifies as primary.
    NoPrimary,
    /// The configured primary is not registered.
    PrimaryNotRegistered(ShardId),
    /// The configured primary is air-gapped.
    PrimaryAirGapped(ShardId),
    /// The primary has no live handle.
    PrimaryUnavailable(ShardId),
    /// No air-gapped shard is registered.
    NoEdges,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPrimary => write!(f, "no primary shard"),
            Self::PrimaryNotRegistered(id) => write!(f, "primary {id} is not registered"),
            Self::PrimaryAirGapped(id) => write!(f, "primary {id} is air-gapped"),
            Self::PrimaryUnavailable(id) => write!(f, "primary {id} has no live handle"),
            Self::NoEdges => write!(f, "no air-gapped shards"),
        }
    }
}

/// Result of syncing one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSyncOutcome {
    /// The edge shard.
    pub edge: ShardId,
    /// Entries applied this pass; zero for a heartbeat or a failure.
    pub applied: usize,
    /// The edge's cursor after the pass.
    pub cursor: SequenceNumber,
    /// Why the pass failed, if it did.
    pub error: Option<ReplicationError>,
}

impl EdgeSyncOutcome {
    /// Returns true if the pass succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one `perform_sync` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// Nothing to do.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
    /// Every edge was attempted.
    Completed {
        /// The primary that was read.
        primary: ShardId,
        /// One pass per edge, in registration order.
        passes: Vec<EdgeSyncOutcome>,
    },
}

impl SyncReport {
    /// Returns true if the cycle was skipped.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Per-edge passes; empty when skipped.
    #[must_use]
    pub fn passes(&self) -> &[EdgeSyncOutcome] {
        match self {
            Self::Skipped { .. } => &[],
            Self::Completed { passes, .. } => passes,
        }
    }

    /// Total entries applied across all edges.
    #[must_use]
    pub fn applied_total(&self) -> usize {
        self.passes().iter().map(|p| p.applied).sum()
    }

    /// Edges whose pass failed.
    #[must_use]
    pub fn failed_edges(&self) -> Vec<ShardId> {
        self.passes()
            .iter()
            .filter(|p| !p.is_success())
            .map(|p| p.edge.clone())
            .collect()
    }
}

// -----------------------------------------------------------------------------
// SyncJob
// -----------------------------------------------------------------------------

/// The state one pass needs; cloned into the background task.
///
/// Clones share `pass_lock`, so a manual pass, a timer pass, and a pass
/// left running by a stopped timer never overlap.
#[derive(Clone)]
struct SyncJob {
    registry: Arc<ShardRegistry>,
    cursors: Arc<dyn CursorStore>,
    primary: Option<ShardId>,
    batch_limit: u32,
    pass_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncJob {
    async fn perform(&self) -> SyncReport {
        let _pass = self.pass_lock.lock().await;
        let (primary, primary_driver, edges) = match self.plan() {
            Ok(plan) => plan,
            Err(reason) => {
                debug!(reason = %reason, "Replication cycle skipped");
                return SyncReport::Skipped { reason };
            }
        };

        let futures = edges
            .into_iter()
            .map(|edge| self.sync_edge(&primary, primary_driver.as_ref(), edge));
        let passes = futures::future::join_all(futures).await;

        let failed = passes.iter().filter(|p| !p.is_success()).count();
        if failed > 0 {
            warn!(primary = %primary, edges = passes.len(), failed, "Replication cycle finished with failures");
        } else {
            debug!(primary = %primary, edges = passes.len(), "Replication cycle finished");
        }
        SyncReport::Completed { primary, passes }
    }

    #[allow(clippy::type_complexity)]
    fn plan(&self) -> Result<(ShardId, Arc<dyn GraphDriver>, Vec<ShardId>), SkipReason> {
        let primary = match &self.primary {
            Some(primary) => {
                let config = self
                    .registry
                    .get_shard_config(primary)
                    .ok_or_else(|| SkipReason::PrimaryNotRegistered(primary.clone()))?;
                if config.air_gapped {
                    return Err(SkipReason::PrimaryAirGapped(primary.clone()));
                }
                primary.clone()
            }
            None => self
                .registry
                .primary_candidate()
                .ok_or(SkipReason::NoPrimary)?,
        };

        let edges = self.registry.edge_shards();
        if edges.is_empty() {
            return Err(SkipReason::NoEdges);
        }

        let driver = self
            .registry
            .get_driver(&primary)
            .ok_or_else(|| SkipReason::PrimaryUnavailable(primary.clone()))?;
        Ok((primary, driver, edges))
    }

    async fn sync_edge(
        &self,
        primary: &ShardId,
        primary_driver: &dyn GraphDriver,
        edge: ShardId,
    ) -> EdgeSyncOutcome {
        let start = Instant::now();
        let mut cursor = SequenceNumber::ZERO;
        let result = self
            .try_sync_edge(primary, primary_driver, &edge, &mut cursor)
            .await;

        match result {
            Ok(applied) => {
                info!(
                    primary = %primary,
                    edge = %edge,
                    applied,
                    cursor = %cursor,
                    elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
                    "Edge sync pass"
                );
                EdgeSyncOutcome {
                    edge,
                    applied,
                    cursor,
                    error: None,
                }
            }
            Err(error) => {
                warn!(primary = %primary, edge = %edge, cursor = %cursor, error = %error, "Edge sync failed");
                EdgeSyncOutcome {
                    edge,
                    applied: 0,
                    cursor,
                    error: Some(error),
                }
            }
        }
    }

    /// Runs one pass for `edge`, leaving the edge's current cursor in
    /// `cursor` whether or not the pass succeeds.
    async fn try_sync_edge(
        &self,
        primary: &ShardId,
        primary_driver: &dyn GraphDriver,
        edge: &ShardId,
        cursor: &mut SequenceNumber,
    ) -> ReplicationResult<usize> {
        let edge_driver =
            self.registry
                .get_driver(edge)
                .ok_or_else(|| ReplicationError::EdgeUnavailable {
                    shard_id: edge.clone(),
                })?;

        *cursor = self.cursors.load(primary, edge).await?;

        let entries = primary_driver
            .read_changes(*cursor, self.batch_limit)
            .await
            .map_err(|source| ReplicationError::Driver {
                shard_id: primary.clone(),
                source,
            })?;
        let Some(last) = entries.iter().map(|e| e.sequence).max() else {
            return Ok(0);
        };

        edge_driver
            .apply_changes(&entries)
            .await
            .map_err(|source| ReplicationError::Driver {
                shard_id: edge.clone(),
                source,
            })?;

        self.cursors.store(primary, edge, last).await?;
        *cursor = last;
        Ok(entries.len())
    }
}

// -----------------------------------------------------------------------------
// ReplicationManager
// -----------------------------------------------------------------------------

struct RunningCycle {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the replication job and its background timer.
pub struct ReplicationManager {
    job: SyncJob,
    config: ReplicationConfig,
    running: Mutex<Option<RunningCycle>>,
}

impl ReplicationManager {
    /// Creates a manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        registry: Arc<ShardRegistry>,
        cursors: Arc<dyn CursorStore>,
        config: ReplicationConfig,
    ) -> ReplicationResult<Self> {
        config.validate()?;
        Ok(Self {
            job: SyncJob {
                registry,
                cursors,
                primary: config.primary.clone(),
                batch_limit: config.batch_limit,
                pass_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            config,
            running: Mutex::new(None),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Runs one sync pass across every edge now. Waits for any pass
    /// already in flight to finish first.
    pub async fn perform_sync(&self) -> SyncReport {
        self.job.perform().await
    }

    /// Starts the timer at the configured interval.
    ///
    /// # Errors
    ///
    /// See [`Self::start_replication_cycle`].
    pub fn start(&self) -> ReplicationResult<bool> {
        self.start_replication_cycle(self.config.interval)
    }

    /// Starts running `perform_sync` every `interval`. The first pass runs
    /// one interval after the call.
    ///
    /// Returns `false` without starting a second timer if one is already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is below the minimum.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime or if the lock is poisoned.
    pub fn start_replication_cycle(&self, interval: Duration) -> ReplicationResult<bool> {
        validate_interval(interval)?;

        let mut running = self.running.lock().expect("replication lock poisoned");
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Replication cycle already running");
            return Ok(false);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(replication_loop(self.job.clone(), interval, shutdown_rx));
        *running = Some(RunningCycle {
            shutdown_tx,
            handle,
        });
        drop(running);

        info!(interval = ?interval, "Replication cycle started");
        Ok(true)
    }

    /// Stops the timer. A pass already in flight runs to completion.
    ///
    /// Returns `false` if the timer was not running.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub fn stop(&self) -> bool {
        let cycle = self.running.lock().expect("replication lock poisoned").take();
        match cycle {
            Some(cycle) => {
                // Either the signal or the dropped sender ends the loop.
                let _ = cycle.shutdown_tx.try_send(());
                info!("Replication cycle stopped");
                true
            }
            None => false,
        }
    }

    /// Stops the timer and waits for any in-flight pass to finish.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    pub async fn shutdown(&self) {
        let cycle = self.running.lock().expect("replication lock poisoned").take();
        if let Some(cycle) = cycle {
            let _ = cycle.shutdown_tx.try_send(());
            if let Err(e) = cycle.handle.await {
                warn!(error = %e, "Replication task ended abnormally");
            }
            info!("Replication cycle shut down");
        }
    }

    /// Returns true while the timer is running.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("replication lock poisoned")
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl fmt::Debug for ReplicationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for ReplicationManager {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            if let Some(cycle) = running.take() {
                cycle.handle.abort();
            }
        }
    }
}

async fn replication_loop(job: SyncJob, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Replication task shutting down");
                break;
            }
            _ = ticker.tick() => {
                job.perform().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::InMemoryCursorStore;
    use meridian_core::ShardConfig;
    use meridian_driver::{QueryParams, SimulatedDriverFactory, SimulatedFaultConfig};

    struct Fixture {
        factory: Arc<SimulatedDriverFactory>,
        registry: Arc<ShardRegistry>,
        cursors: Arc<InMemoryCursorStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let factory = Arc::new(SimulatedDriverFactory::new());
            Self {
                registry: Arc::new(ShardRegistry::new(factory.clone())),
                factory,
                cursors: Arc::new(InMemoryCursorStore::new()),
            }
        }

        async fn shard(&self, id: &str, air_gapped: bool) {
            let mut config = ShardConfig::new(id, format!("sim://{id}"), "r");
            if air_gapped {
                config = config.air_gapped();
            }
            self.registry.register_shard(config).await;
        }

        fn manager(&self, config: ReplicationConfig) -> ReplicationManager {
            ReplicationManager::new(Arc::clone(&self.registry), self.cursors.clone(), config)
                .unwrap()
        }

        fn write(&self, id: &str, n: usize) {
            let graph = self.factory.graph(&format!("sim://{id}"));
            for i in 0..n {
                graph.record_write(format!("CREATE (:E {{i: {i}}})"), QueryParams::new());
            }
        }
    }

    /// Yields after every cursor read so concurrent passes interleave.
    #[derive(Default)]
    struct YieldingCursorStore(InMemoryCursorStore);

    #[async_trait::async_trait]
    impl CursorStore for YieldingCursorStore {
        async fn load(&self, primary: &ShardId, edge: &ShardId) -> ReplicationResult<SequenceNumber> {
            let cursor = self.0.load(primary, edge).await?;
            tokio::task::yield_now().await;
            Ok(cursor)
        }

        async fn store(
            &self,
            primary: &ShardId,
            edge: &ShardId,
            cursor: SequenceNumber,
        ) -> ReplicationResult<()> {
            self.0.store(primary, edge, cursor).await
        }
    }

    #[tokio::test]
    async fn test_skips_without_primary_or_edges() {
        let fx = Fixture::new();
        let manager = fx.manager(ReplicationConfig::for_testing());
        assert_eq!(
            manager.perform_sync().await,
            SyncReport::Skipped {
                reason: SkipReason::NoPrimary
            }
        );

        fx.shard("core", false).await;
        assert_eq!(
            manager.perform_sync().await,
            SyncReport::Skipped {
                reason: SkipReason::NoEdges
            }
        );
    }

    #[tokio::test]
    async fn test_explicit_primary_checks() {
        let fx = Fixture::new();
        fx.shard("core", false).await;
        fx.shard("edge", true).await;

        let missing = fx.manager(ReplicationConfig::for_testing().with_primary("ghost"));
        assert_eq!(
            missing.perform_sync().await,
            SyncReport::Skipped {
                reason: SkipReason::PrimaryNotRegistered(ShardId::new("ghost"))
            }
        );

        let gapped = fx.manager(ReplicationConfig::for_testing().with_primary("edge"));
        assert_eq!(
            gapped.perform_sync().await,
            SyncReport::Skipped {
                reason: SkipReason::PrimaryAirGapped(ShardId::new("edge"))
            }
        );

        fx.registry.close_shard(&ShardId::new("core")).await;
        let closed = fx.manager(ReplicationConfig::for_testing().with_primary("core"));
        assert!(matches!(
            closed.perform_sync().await,
            SyncReport::Skipped {
                reason: SkipReason::PrimaryUnavailable(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_pass_when_log_is_empty() {
        let fx = Fixture::new();
        fx.shard("core", false).await;
        fx.shard("edge", true).await;
        let manager = fx.manager(ReplicationConfig::for_testing());

        let report = manager.perform_sync().await;
        assert_eq!(report.passes().len(), 1);
        assert_eq!(report.passes()[0].applied, 0);
        assert_eq!(report.passes()[0].cursor, SequenceNumber::ZERO);
        assert!(report.failed_edges().is_empty());
    }

    #[tokio::test]
    async fn test_batches_respect_limit_and_advance_cursor() {
        let fx = Fixture::new();
        fx.shard("core", false).await;
        fx.shard("edge", true).await;
        fx.write("core", 5);
        let manager = fx.manager(ReplicationConfig::for_testing().with_batch_limit(2));

        let first = manager.perform_sync().await;
        assert_eq!(first.applied_total(), 2);
        assert_eq!(first.passes()[0].cursor, SequenceNumber::new(2));

        manager.perform_sync().await;
        let third = manager.perform_sync().await;
        assert_eq!(third.applied_total(), 1);
        assert_eq!(
            fx.cursors.get(&ShardId::new("core"), &ShardId::new("edge")),
            Some(SequenceNumber::new(5))
        );
        assert_eq!(fx.factory.graph("sim://edge").applied().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_apply_does_not_advance_cursor() {
        let fx = Fixture::new();
        fx.shard("core", false).await;
        fx.shard("edge", true).await;
        fx.write("core", 3);
        let edge = fx.factory.graph("sim://edge");
        edge.set_faults(SimulatedFaultConfig::none().with_fail_apply());
        let manager = fx.manager(ReplicationConfig::for_testing());

        let report = manager.perform_sync().await;
        assert_eq!(report.failed_edges(), vec![ShardId::new("edge")]);
        assert!(matches!(
            report.passes()[0].error,
            Some(ReplicationError::Driver { .. })
        ));
        assert_eq!(fx.cursors.get(&ShardId::new("core"), &ShardId::new("edge")), None);

        edge.set_faults(SimulatedFaultConfig::none());
        let retry = manager.perform_sync().await;
        assert_eq!(retry.applied_total(), 3);
        assert_eq!(edge.applied().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_passes_apply_each_entry_once() {
        let fx = Fixture::new();
        fx.shard("core", false).await;
        fx.shard("edge", true).await;
        fx.write("core", 3);
        let manager = ReplicationManager::new(
            Arc::clone(&fx.registry),
            Arc::new(YieldingCursorStore::default()),
            ReplicationConfig::for_testing(),
        )
        .unwrap();

        let (a, b) = tokio::join!(manager.perform_sync(), manager.perform_sync());

        assert_eq!(a.applied_total() + b.applied_total(), 3);
        assert_eq!(fx.factory.graph("sim://edge").applied().len(), 3);
    }

    #[tokio::test]
    async fn test_closed_edge_fails_alone() {
        let fx = Fixture::new();
        fx.shard("core", false).await;
        fx.shard("edge-1", true).await;
        fx.shard("edge-2", true).await;
        fx.write("core", 1);
        fx.registry.close_shard(&ShardId::new("edge-1")).await;
        let manager = fx.manager(ReplicationConfig::for_testing());

        let report = manager.perform_sync().await;
        assert_eq!(report.failed_edges(), vec![ShardId::new("edge-1")]);
        assert_eq!(report.applied_total(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_is_safe() {
        let fx = Fixture::new();
        let manager = fx.manager(ReplicationConfig::for_testing());

        assert!(!manager.stop());
        assert!(manager.start().unwrap());
        assert!(!manager.start_replication_cycle(Duration::from_millis(50)).unwrap());
        assert!(manager.is_running());

        assert!(manager.stop());
        assert!(!manager.stop());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_short_interval() {
        let fx = Fixture::new();
        let manager = fx.manager(ReplicationConfig::for_testing());
        let err = manager
            .start_replication_cycle(Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Config(_)));
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_cycle_replicates_in_background() {
        let fx = Fixture::new();
        fx.shard("core", false).await;
        fx.shard("edge", true).await;
        fx.write("core", 4);
        let manager = fx.manager(ReplicationConfig::for_testing());

        manager.start().unwrap();
        let edge = fx.factory.graph("sim://edge");
        for _ in 0..100 {
            if edge.applied().len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        manager.shutdown().await;

        assert_eq!(edge.applied().len(), 4);
        assert!(!manager.is_running());
    }
}
