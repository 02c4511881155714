//! Shard registry - shard identities, configs, and live driver handles.
//!
//! The registry is the only mutable state shared by the router, the admin
//! fan-out, and the replication job. Lookups are synchronous reads against
//! committed state; only registration and closing suspend.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use meridian_core::limits::SHARDS_MAX;
use meridian_core::{ShardConfig, ShardId};
use meridian_driver::{DriverFactory, GraphDriver};
use tracing::{debug, info, warn};

/// Result of a `register_shard` call.
///
/// Registration never returns an error: a shard that cannot be reached is
/// reported here and left out of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new live handle was committed.
    Registered,
    /// A live handle already existed; nothing changed.
    AlreadyRegistered,
    /// The shard was not registered.
    Failed {
        /// Why registration failed.
        reason: String,
    },
}

impl RegistrationOutcome {
    /// Returns true if the shard has a live handle after the call.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Registered | Self::AlreadyRegistered)
    }
}

#[derive(Default)]
struct Tables {
    /// Shard ids in first-registration order.
    order: Vec<ShardId>,
    configs: HashMap<ShardId, ShardConfig>,
    drivers: HashMap<ShardId, Arc<dyn GraphDriver>>,
}

/// Table of registered shards.
///
/// Construct one per process (or per test) and share it through an `Arc`.
pub struct ShardRegistry {
    factory: Arc<dyn DriverFactory>,
    tables: RwLock<Tables>,
}

impl ShardRegistry {
    /// Creates an empty registry that opens connections through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            factory,
            tables: RwLock::new(Tables::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Connects to a shard, verifies connectivity, and commits it.
    ///
    /// If the shard already has a live handle this is a logged no-op. If the
    /// shard was closed earlier, its retained config is used and the
    /// supplied one is ignored. Connection and connectivity failures are
    /// logged and reported as [`RegistrationOutcome::Failed`].
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub async fn register_shard(&self, config: ShardConfig) -> RegistrationOutcome {
        if let Err(e) = config.validate() {
            warn!(shard_id = %config.id, error = %e, "Rejected invalid shard config");
            return RegistrationOutcome::Failed {
                reason: e.to_string(),
            };
        }

        let config = {
            let tables = self.read();
            if tables.drivers.contains_key(&config.id) {
                info!(shard_id = %config.id, "Shard already registered, skipping");
                return RegistrationOutcome::AlreadyRegistered;
            }
            match tables.configs.get(&config.id) {
                Some(retained) => {
                    debug!(shard_id = %config.id, "Reconnecting closed shard with retained config");
                    retained.clone()
                }
                None if tables.configs.len() >= SHARDS_MAX => {
                    warn!(shard_id = %config.id, limit = SHARDS_MAX, "Shard limit reached");
                    return RegistrationOutcome::Failed {
                        reason: format!("registry is full ({SHARDS_MAX} shards)"),
                    };
                }
                None => config,
            }
        };

        let driver = match self.factory.connect(&config).await {
            Ok(driver) => driver,
            Err(e) => {
                warn!(shard_id = %config.id, uri = %config.uri, error = %e, "Shard registration failed");
                return RegistrationOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if let Err(e) = driver.verify_connectivity().await {
            warn!(shard_id = %config.id, uri = %config.uri, error = %e, "Shard registration failed");
            close_quietly(&config.id, driver.as_ref()).await;
            return RegistrationOutcome::Failed {
                reason: e.to_string(),
            };
        }

        // Other callers may have committed while we were connecting: the
        // same id (first commit wins) or enough new ids to fill the table.
        let rejected = {
            let mut tables = self.write();
            if tables.drivers.contains_key(&config.id) {
                Some(RegistrationOutcome::AlreadyRegistered)
            } else if !tables.configs.contains_key(&config.id) && tables.configs.len() >= SHARDS_MAX {
                Some(RegistrationOutcome::Failed {
                    reason: format!("registry is full ({SHARDS_MAX} shards)"),
                })
            } else {
                if !tables.configs.contains_key(&config.id) {
                    tables.order.push(config.id.clone());
                }
                tables.drivers.insert(config.id.clone(), Arc::clone(&driver));
                tables.configs.insert(config.id.clone(), config.clone());
                None
            }
        };

        if let Some(outcome) = rejected {
            match &outcome {
                RegistrationOutcome::AlreadyRegistered => {
                    info!(shard_id = %config.id, "Shard already registered, skipping");
                }
                _ => warn!(shard_id = %config.id, limit = SHARDS_MAX, "Shard limit reached"),
            }
            close_quietly(&config.id, driver.as_ref()).await;
            return outcome;
        }

        info!(
            shard_id = %config.id,
            region = %config.region,
            air_gapped = config.air_gapped,
            "Registered shard"
        );
        RegistrationOutcome::Registered
    }

    /// Closes a shard's live handle and keeps its config.
    ///
    /// Returns true if a handle was closed. Close errors are logged.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub async fn close_shard(&self, shard_id: &ShardId) -> bool {
        let driver = self.write().drivers.remove(shard_id);
        match driver {
            Some(driver) => {
                close_logged(shard_id, driver.as_ref()).await;
                info!(shard_id = %shard_id, "Closed shard handle");
                true
            }
            None => false,
        }
    }

    /// Closes a shard's handle (if live) and forgets its config.
    ///
    /// Returns the removed config.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub async fn remove_shard(&self, shard_id: &ShardId) -> Option<ShardConfig> {
        let (driver, config) = {
            let mut tables = self.write();
            tables.order.retain(|id| id != shard_id);
            (
                tables.drivers.remove(shard_id),
                tables.configs.remove(shard_id),
            )
        };
        if let Some(driver) = driver {
            close_logged(shard_id, driver.as_ref()).await;
        }
        if config.is_some() {
            info!(shard_id = %shard_id, "Removed shard");
        }
        config
    }

    /// Closes every live handle and clears the registry.
    ///
    /// Per-shard close errors are logged, never returned. Safe to call
    /// repeatedly and on an empty registry.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub async fn close_all(&self) {
        let drivers: Vec<(ShardId, Arc<dyn GraphDriver>)> = {
            let mut tables = self.write();
            let order = std::mem::take(&mut tables.order);
            tables.configs.clear();
            let mut drivers = std::mem::take(&mut tables.drivers);
            order
                .into_iter()
                .filter_map(|id| drivers.remove(&id).map(|driver| (id, driver)))
                .collect()
        };

        let count = drivers.len();
        for (shard_id, driver) in drivers {
            close_logged(&shard_id, driver.as_ref()).await;
        }
        if count > 0 {
            info!(count, "Closed all shards");
        } else {
            debug!("close_all on registry with no live shards");
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Returns the live handle for a shard, if any. Never connects.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn get_driver(&self, shard_id: &ShardId) -> Option<Arc<dyn GraphDriver>> {
        self.read().drivers.get(shard_id).cloned()
    }

    /// Returns every registered shard id in registration order, including
    /// shards whose handle has been closed.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn get_all_shards(&self) -> Vec<ShardId> {
        self.read().order.clone()
    }

    /// Returns the shard's config, if registered.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn get_shard_config(&self, shard_id: &ShardId) -> Option<ShardConfig> {
        self.read().configs.get(shard_id).cloned()
    }

    /// Returns the ids of shards with a live handle, in registration order.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn live_shards(&self) -> Vec<ShardId> {
        let tables = self.read();
        tables
            .order
            .iter()
            .filter(|id| tables.drivers.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Returns the first registered shard that is not air-gapped.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn primary_candidate(&self) -> Option<ShardId> {
        let tables = self.read();
        tables
            .order
            .iter()
            .find(|id| tables.configs.get(*id).is_some_and(|c| !c.air_gapped))
            .cloned()
    }

    /// Returns every air-gapped shard in registration order.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn edge_shards(&self) -> Vec<ShardId> {
        let tables = self.read();
        tables
            .order
            .iter()
            .filter(|id| tables.configs.get(*id).is_some_and(|c| c.air_gapped))
            .cloned()
            .collect()
    }

    /// Number of registered shards.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    /// Returns true if no shard is registered.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("registry lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("registry lock poisoned")
    }
}

impl fmt::Debug for ShardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.read();
        f.debug_struct("ShardRegistry")
            .field("shards", &tables.order)
            .field("live", &tables.drivers.len())
            .finish_non_exhaustive()
    }
}

async fn close_logged(shard_id: &ShardId, driver: &dyn GraphDriver) {
    if let Err(e) = driver.close().await {
        warn!(shard_id = %shard_id, error = %e, "Failed to close shard driver");
    }
}

async fn close_quietly(shard_id: &ShardId, driver: &dyn GraphDriver) {
    if let Err(e) = driver.close().await {
        debug!(shard_id = %shard_id, error = %e, "Discarded driver failed to close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_driver::{SimulatedDriverFactory, SimulatedFaultConfig};

    fn setup() -> (Arc<SimulatedDriverFactory>, ShardRegistry) {
        let factory = Arc::new(SimulatedDriverFactory::new());
        let registry = ShardRegistry::new(factory.clone());
        (factory, registry)
    }

    fn shard(id: &str, region: &str) -> ShardConfig {
        ShardConfig::new(id, format!("sim://{id}"), region)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let (_, registry) = setup();

        let outcome = registry.register_shard(shard("us-shard", "us-east")).await;
        assert_eq!(outcome, RegistrationOutcome::Registered);

        let id = ShardId::new("us-shard");
        assert!(registry.get_driver(&id).is_some());
        assert_eq!(registry.get_all_shards(), vec![id.clone()]);
        assert_eq!(
            registry.get_shard_config(&id).map(|c| c.region.to_string()),
            Some("us-east".to_string())
        );
        assert!(registry.get_driver(&ShardId::new("missing")).is_none());
    }

    #[tokio::test]
    async fn test_register_twice_keeps_one_handle() {
        let (factory, registry) = setup();

        registry.register_shard(shard("s1", "r")).await;
        let outcome = registry.register_shard(shard("s1", "r")).await;

        assert_eq!(outcome, RegistrationOutcome::AlreadyRegistered);
        assert!(outcome.is_live());
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.graph("sim://s1").connect_count(), 1);
    }

    /// Yields before connecting so concurrent registrations interleave.
    struct YieldingFactory(SimulatedDriverFactory);

    #[async_trait::async_trait]
    impl DriverFactory for YieldingFactory {
        async fn connect(
            &self,
            config: &ShardConfig,
        ) -> meridian_driver::DriverResult<Arc<dyn GraphDriver>> {
            tokio::task::yield_now().await;
            self.0.connect(config).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_registrations_respect_shard_limit() {
        let registry = ShardRegistry::new(Arc::new(YieldingFactory(SimulatedDriverFactory::new())));
        let overflow = 8;

        let registrations = (0..SHARDS_MAX + overflow)
            .map(|i| registry.register_shard(shard(&format!("s-{i}"), "r")));
        let outcomes = futures::future::join_all(registrations).await;

        let failed = outcomes.iter().filter(|o| !o.is_live()).count();
        assert_eq!(failed, overflow);
        assert_eq!(registry.len(), SHARDS_MAX);
        assert_eq!(registry.get_all_shards().len(), SHARDS_MAX);
    }

    #[tokio::test]
    async fn test_register_soft_fails_on_connectivity() {
        let (factory, registry) = setup();
        factory
            .graph("sim://down")
            .set_faults(SimulatedFaultConfig::none().with_fail_connectivity());

        let outcome = registry.register_shard(shard("down", "r")).await;

        assert!(matches!(outcome, RegistrationOutcome::Failed { .. }));
        assert!(registry.get_all_shards().is_empty());
        assert!(registry.get_driver(&ShardId::new("down")).is_none());
        // The half-open handle is released.
        assert_eq!(factory.graph("sim://down").drivers_closed(), 1);
    }

    #[tokio::test]
    async fn test_register_soft_fails_on_refused_connection() {
        let (factory, registry) = setup();
        factory
            .graph("sim://refused")
            .set_faults(SimulatedFaultConfig::none().with_refuse_connections());

        let outcome = registry.register_shard(shard("refused", "r")).await;
        assert!(!outcome.is_live());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_config() {
        let (_, registry) = setup();
        let outcome = registry
            .register_shard(ShardConfig::new("bad", "", "r"))
            .await;
        assert!(matches!(outcome, RegistrationOutcome::Failed { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_shard_keeps_config_and_reconnects() {
        let (factory, registry) = setup();
        registry.register_shard(shard("s1", "us-east")).await;
        let id = ShardId::new("s1");

        assert!(registry.close_shard(&id).await);
        assert!(!registry.close_shard(&id).await);
        assert!(registry.get_driver(&id).is_none());
        assert_eq!(registry.get_all_shards(), vec![id.clone()]);
        assert!(registry.live_shards().is_empty());

        // The retained config wins over the new one.
        let outcome = registry.register_shard(shard("s1", "eu-west")).await;
        assert_eq!(outcome, RegistrationOutcome::Registered);
        assert_eq!(registry.get_all_shards(), vec![id.clone()]);
        assert_eq!(
            registry.get_shard_config(&id).map(|c| c.region.to_string()),
            Some("us-east".to_string())
        );
        assert_eq!(factory.graph("sim://s1").connect_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_shard() {
        let (factory, registry) = setup();
        registry.register_shard(shard("s1", "r")).await;
        registry.register_shard(shard("s2", "r")).await;

        let removed = registry.remove_shard(&ShardId::new("s1")).await;
        assert_eq!(removed.map(|c| c.id), Some(ShardId::new("s1")));
        assert_eq!(registry.get_all_shards(), vec![ShardId::new("s2")]);
        assert_eq!(factory.graph("sim://s1").drivers_closed(), 1);

        assert!(registry.remove_shard(&ShardId::new("s1")).await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let (factory, registry) = setup();
        registry.close_all().await;
        assert!(registry.get_all_shards().is_empty());

        registry.register_shard(shard("s1", "r")).await;
        registry.register_shard(shard("s2", "r")).await;
        factory
            .graph("sim://s2")
            .set_faults(SimulatedFaultConfig::none().with_fail_close());

        registry.close_all().await;
        assert!(registry.get_all_shards().is_empty());
        assert!(registry.get_shard_config(&ShardId::new("s1")).is_none());
        assert_eq!(factory.graph("sim://s1").drivers_closed(), 1);
        assert_eq!(factory.graph("sim://s2").drivers_closed(), 1);

        registry.close_all().await;
        assert!(registry.get_all_shards().is_empty());
    }

    #[tokio::test]
    async fn test_primary_and_edges() {
        let (_, registry) = setup();
        registry.register_shard(shard("edge-1", "arctic").air_gapped()).await;
        registry.register_shard(shard("core-1", "us-east")).await;
        registry.register_shard(shard("core-2", "eu-west")).await;
        registry.register_shard(shard("edge-2", "arctic").air_gapped()).await;

        assert_eq!(registry.primary_candidate(), Some(ShardId::new("core-1")));
        assert_eq!(
            registry.edge_shards(),
            vec![ShardId::new("edge-1"), ShardId::new("edge-2")]
        );
    }

    #[tokio::test]
    async fn test_registration_order_is_stable() {
        let (_, registry) = setup();
        for id in ["c", "a", "b"] {
            registry.register_shard(shard(id, "r")).await;
        }
        let ids: Vec<String> = registry
            .get_all_shards()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
