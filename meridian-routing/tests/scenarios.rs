//! End-to-end routing scenarios against the simulated engine.
//!
//! Each test wires a registry, a strategy and a router the way a node does
//! at startup, then drives it through one observable behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meridian_core::{QueryContext, RegionId, ShardConfig, ShardId};
use meridian_driver::{QueryParams, SimulatedDriverFactory, SimulatedFaultConfig};
use meridian_routing::{
    GraphRouter, HashPartitionStrategy, LocalityAwarePartitionStrategy, PartitionStrategy,
    RegistrationOutcome, RoutingError, ShardRegistry,
};
use serde_json::json;

struct Cluster {
    factory: Arc<SimulatedDriverFactory>,
    registry: Arc<ShardRegistry>,
}

impl Cluster {
    fn new() -> Self {
        let factory = Arc::new(SimulatedDriverFactory::new());
        let registry = Arc::new(ShardRegistry::new(factory.clone()));
        Self { factory, registry }
    }

    async fn with_shards(ids: &[&str]) -> Self {
        let cluster = Self::new();
        for id in ids {
            cluster.add(ShardConfig::new(*id, uri(id), "us-east")).await;
        }
        cluster
    }

    async fn add(&self, config: ShardConfig) -> RegistrationOutcome {
        self.registry.register_shard(config).await
    }
}

fn uri(id: &str) -> String {
    format!("sim://{id}")
}

fn locality(pairs: &[(&str, &str)]) -> HashMap<RegionId, ShardId> {
    pairs
        .iter()
        .map(|(region, shard)| (RegionId::new(*region), ShardId::new(*shard)))
        .collect()
}

// -----------------------------------------------------------------------------
// Placement
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_region_routes_to_local_shard() {
    let cluster = Cluster::new();
    cluster
        .add(ShardConfig::new("us-shard", uri("us-shard"), "us-east"))
        .await;
    cluster
        .add(ShardConfig::new("eu-shard", uri("eu-shard"), "eu-west"))
        .await;

    let strategy = LocalityAwarePartitionStrategy::from_registry(
        locality(&[("us-east", "us-shard"), ("eu-west", "eu-shard")]),
        &cluster.registry,
    );

    let us = QueryContext::new().with_region("us-east");
    let eu = QueryContext::new().with_region("eu-west");
    assert_eq!(strategy.resolve_shard(&us).unwrap(), ShardId::new("us-shard"));
    assert_eq!(strategy.resolve_shard(&eu).unwrap(), ShardId::new("eu-shard"));

    let router = GraphRouter::new(Arc::clone(&cluster.registry), Arc::new(strategy));
    router
        .execute("MATCH (n) RETURN n", &QueryParams::new(), &eu)
        .await
        .unwrap();
    assert_eq!(cluster.factory.graph(&uri("eu-shard")).executed().len(), 1);
    assert!(cluster.factory.graph(&uri("us-shard")).executed().is_empty());
}

#[tokio::test]
async fn test_tenant_fallback_is_stable() {
    let cluster = Cluster::with_shards(&["shard-1", "shard-2"]).await;
    let strategy = LocalityAwarePartitionStrategy::from_registry(HashMap::new(), &cluster.registry);
    let ctx = QueryContext::new().with_tenant("tenant-a");

    let first = strategy.resolve_shard(&ctx).unwrap();
    let second = strategy.resolve_shard(&ctx).unwrap();
    assert_eq!(first, second);

    // A fresh strategy over the same candidates, as after a restart.
    let restarted =
        LocalityAwarePartitionStrategy::from_registry(HashMap::new(), &cluster.registry);
    assert_eq!(restarted.resolve_shard(&ctx).unwrap(), first);
}

#[tokio::test]
async fn test_scaling_only_moves_tenants_when_candidates_change() {
    let cluster = Cluster::with_shards(&["shard-1", "shard-2"]).await;
    let before = HashPartitionStrategy::from_registry(&cluster.registry);
    let tenants: Vec<QueryContext> = (0..32)
        .map(|i| QueryContext::new().with_tenant(format!("tenant-{i}")))
        .collect();
    let placed: Vec<ShardId> = tenants
        .iter()
        .map(|ctx| before.resolve_shard(ctx).unwrap())
        .collect();

    // The captured strategy keeps its candidate set after a new shard joins.
    cluster
        .add(ShardConfig::new("shard-3", uri("shard-3"), "us-east"))
        .await;
    for (ctx, shard) in tenants.iter().zip(&placed) {
        assert_eq!(&before.resolve_shard(ctx).unwrap(), shard);
    }

    // A rebuilt strategy sees three candidates and places every tenant on one of them.
    let after = HashPartitionStrategy::from_registry(&cluster.registry);
    for ctx in &tenants {
        let shard = after.resolve_shard(ctx).unwrap();
        assert!(["shard-1", "shard-2", "shard-3"].contains(&shard.as_str()));
    }
}

#[tokio::test]
async fn test_air_gapped_and_failed_shards_are_not_candidates() {
    let cluster = Cluster::with_shards(&["core"]).await;
    cluster
        .add(ShardConfig::new("edge", uri("edge"), "arctic").air_gapped())
        .await;
    cluster
        .factory
        .graph(&uri("down"))
        .set_faults(SimulatedFaultConfig::none().with_fail_connectivity());
    let outcome = cluster
        .add(ShardConfig::new("down", uri("down"), "us-east"))
        .await;
    assert!(!outcome.is_live());

    let strategy = HashPartitionStrategy::from_registry(&cluster.registry);
    for i in 0..16 {
        let ctx = QueryContext::new().with_tenant(format!("t{i}"));
        assert_eq!(strategy.resolve_shard(&ctx).unwrap(), ShardId::new("core"));
    }
}

#[tokio::test]
async fn test_empty_registry_fails_closed() {
    let cluster = Cluster::new();
    let strategy = LocalityAwarePartitionStrategy::from_registry(HashMap::new(), &cluster.registry);
    let router = GraphRouter::new(Arc::clone(&cluster.registry), Arc::new(strategy));

    let err = router
        .execute("RETURN 1", &QueryParams::new(), &QueryContext::new().with_tenant("t"))
        .await
        .unwrap_err();
    assert_eq!(err, RoutingError::NoShardsAvailable);
}

// -----------------------------------------------------------------------------
// Execution
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_write_to_unregistered_shard_names_it() {
    let cluster = Cluster::with_shards(&["shard-1"]).await;
    let strategy = LocalityAwarePartitionStrategy::from_registry(
        locality(&[("ap-south", "ap-shard")]),
        &cluster.registry,
    );
    let router = GraphRouter::new(Arc::clone(&cluster.registry), Arc::new(strategy));

    let ctx = QueryContext::new().with_region("ap-south").with_write(true);
    let err = router
        .execute("CREATE (:Order)", &QueryParams::new(), &ctx)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RoutingError::ShardUnavailable {
            shard_id: ShardId::new("ap-shard")
        }
    );
    assert!(cluster.factory.graph(&uri("shard-1")).executed().is_empty());
}

#[tokio::test]
async fn test_parameters_reach_the_engine() {
    let cluster = Cluster::with_shards(&["shard-1"]).await;
    let strategy = HashPartitionStrategy::from_registry(&cluster.registry);
    let router = GraphRouter::new(Arc::clone(&cluster.registry), Arc::new(strategy));

    let params: QueryParams = [("name".to_string(), json!("ada"))].into_iter().collect();
    router
        .execute(
            "CREATE (:Person {name: $name})",
            &params,
            &QueryContext::new().with_tenant("t").with_write(true),
        )
        .await
        .unwrap();

    let graph = cluster.factory.graph(&uri("shard-1"));
    assert_eq!(graph.executed()[0].params, params);
    assert_eq!(graph.change_log().len(), 1);
}

#[tokio::test]
async fn test_concurrent_executes_share_one_registry() {
    let cluster = Cluster::with_shards(&["a", "b", "c"]).await;
    let strategy = HashPartitionStrategy::from_registry(&cluster.registry);
    let router = Arc::new(GraphRouter::new(
        Arc::clone(&cluster.registry),
        Arc::new(strategy),
    ));

    let handles: Vec<_> = (0..24)
        .map(|i| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                let ctx = QueryContext::new().with_tenant(format!("tenant-{i}"));
                router.execute("RETURN 1", &QueryParams::new(), &ctx).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let (opened, closed) = ["a", "b", "c"].iter().fold((0, 0), |(o, c), id| {
        let graph = cluster.factory.graph(&uri(id));
        (o + graph.sessions_opened(), c + graph.sessions_closed())
    });
    assert_eq!(opened, 24);
    assert_eq!(closed, 24);
}

// -----------------------------------------------------------------------------
// Broadcast
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_broadcast_survives_one_failing_shard() {
    let cluster = Cluster::with_shards(&["shard-1", "shard-2", "shard-3"]).await;
    cluster
        .factory
        .graph(&uri("shard-2"))
        .set_faults(SimulatedFaultConfig::none().with_fail_queries());
    let strategy = HashPartitionStrategy::from_registry(&cluster.registry);
    let router = GraphRouter::new(Arc::clone(&cluster.registry), Arc::new(strategy));

    let report = router
        .broadcast("CREATE INDEX person_name IF NOT EXISTS FOR (p:Person) ON (p.name)", &QueryParams::new())
        .await;

    assert_eq!(report.len(), 3);
    assert_eq!(report.successes().count(), 2);
    assert_eq!(report.failed_shards(), vec![ShardId::new("shard-2")]);
    let (failed, error) = report.failures().next().unwrap();
    assert_eq!(failed, &ShardId::new("shard-2"));
    assert_eq!(error.shard_id(), Some(&ShardId::new("shard-2")));
}

#[tokio::test]
async fn test_broadcast_waits_for_slowest_shard() {
    let cluster = Cluster::with_shards(&["fast-1", "slow", "fast-2"]).await;
    let delay = Duration::from_millis(50);
    cluster
        .factory
        .graph(&uri("slow"))
        .set_faults(SimulatedFaultConfig::none().with_query_delay(delay));
    let strategy = HashPartitionStrategy::from_registry(&cluster.registry);
    let router = GraphRouter::new(Arc::clone(&cluster.registry), Arc::new(strategy));

    let report = router.broadcast("RETURN 1", &QueryParams::new()).await;

    assert!(report.is_complete());
    assert!(report.elapsed >= delay);
    let slow = report.outcome(&ShardId::new("slow")).unwrap();
    assert!(slow.elapsed >= delay);
    // Shards run concurrently, so the whole broadcast is not the sum of its parts.
    assert!(report.elapsed < delay * 3);
}

// -----------------------------------------------------------------------------
// Registry lifecycle
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_registration_is_idempotent_and_soft_fails() {
    let cluster = Cluster::with_shards(&["shard-1"]).await;
    let again = cluster
        .add(ShardConfig::new("shard-1", uri("shard-1"), "us-east"))
        .await;
    assert_eq!(again, RegistrationOutcome::AlreadyRegistered);
    assert_eq!(cluster.registry.get_all_shards(), vec![ShardId::new("shard-1")]);

    cluster
        .factory
        .graph(&uri("bad"))
        .set_faults(SimulatedFaultConfig::none().with_fail_connectivity());
    let outcome = cluster.add(ShardConfig::new("bad", uri("bad"), "us-east")).await;
    assert!(matches!(outcome, RegistrationOutcome::Failed { .. }));
    assert!(!cluster.registry.get_all_shards().contains(&ShardId::new("bad")));
}

#[tokio::test]
async fn test_close_all_twice() {
    let cluster = Cluster::with_shards(&["shard-1", "shard-2"]).await;

    cluster.registry.close_all().await;
    assert!(cluster.registry.get_all_shards().is_empty());
    cluster.registry.close_all().await;
    assert!(cluster.registry.get_all_shards().is_empty());

    assert_eq!(cluster.factory.graph(&uri("shard-1")).drivers_closed(), 1);
}
