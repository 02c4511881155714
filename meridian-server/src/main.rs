//! Meridian shard routing node.
//!
//! Registers the configured shards, provisions vector indexes, probes every
//! shard once, and runs the air-gapped replication cycle until Ctrl-C.
//! Shards are served by the in-memory engine.
//!
//! ```bash
//! meridian-node \
//!     --shard id=us-shard,uri=bolt://us:7687,region=us-east,capabilities=vector \
//!     --shard id=eu-shard,uri=bolt://eu:7687,region=eu-west,replica=us-shard \
//!     --shard id=arctic,uri=bolt://arctic:7687,region=arctic,air-gapped \
//!     --locality us-east=us-shard --locality eu-west=eu-shard \
//!     --vector-index doc_embedding:Document:embedding:384 \
//!     --replication-interval-ms 5000
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use meridian_core::{AccessMode, Capabilities, Credentials, RegionId, ShardConfig, ShardId};
use meridian_driver::{QueryParams, SimulatedDriverFactory};
use meridian_replication::{InMemoryCursorStore, ReplicationConfig, ReplicationManager};
use meridian_routing::{
    AdminFanout, GraphRouter, LocalityAwarePartitionStrategy, PartitionStrategy, RouterConfig,
    ShardRegistry, VectorIndexConfig,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Meridian shard routing node.
#[derive(Parser, Debug)]
#[command(name = "meridian-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Shard in format `id=..,uri=..,region=..[,air-gapped][,capabilities=a+b][,replica=..][,user=..,password=..]`.
    /// Can be specified multiple times; registration order is preserved.
    #[arg(long = "shard", value_parser = parse_shard)]
    shards: Vec<ShardConfig>,

    /// Locality entry in format `region=shard`.
    #[arg(long = "locality", value_parser = parse_locality)]
    locality: Vec<(RegionId, ShardId)>,

    /// Replication primary. Defaults to the first shard that is not air-gapped.
    #[arg(long)]
    primary: Option<String>,

    /// Milliseconds between replication passes.
    #[arg(long, default_value = "30000")]
    replication_interval_ms: u64,

    /// Maximum change entries applied to one edge per pass.
    #[arg(long, default_value = "500")]
    replication_batch: u32,

    /// Replica hops a query may take when its shard is down.
    #[arg(long, default_value = "0")]
    failover_budget: u32,

    /// Vector index in format `name:Label:property:dimensions[:similarity]`,
    /// provisioned on every shard that supports vectors.
    #[arg(long = "vector-index", value_parser = parse_vector_index)]
    vector_indexes: Vec<VectorIndexConfig>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

/// Parses a shard specification.
fn parse_shard(s: &str) -> Result<ShardConfig, String> {
    let mut id = None;
    let mut uri = None;
    let mut region = None;
    let mut air_gapped = false;
    let mut capabilities = Capabilities::none();
    let mut replica = None;
    let mut user = None;
    let mut password = None;

    for field in s.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        match field.split_once('=') {
            None if field == "air-gapped" => air_gapped = true,
            None => return Err(format!("unknown flag '{field}' in shard '{s}'")),
            Some(("id", value)) => id = Some(value.to_string()),
            Some(("uri", value)) => uri = Some(value.to_string()),
            Some(("region", value)) => region = Some(value.to_string()),
            Some(("replica", value)) => replica = Some(value.to_string()),
            Some(("user", value)) => user = Some(value.to_string()),
            Some(("password", value)) => password = Some(value.to_string()),
            Some(("capabilities", value)) => {
                capabilities = value.parse().map_err(|e| format!("{e} in shard '{s}'"))?;
            }
            Some((key, _)) => return Err(format!("unknown key '{key}' in shard '{s}'")),
        }
    }

    let id = id.ok_or_else(|| format!("missing id in shard '{s}'"))?;
    let uri = uri.ok_or_else(|| format!("missing uri in shard '{s}'"))?;
    let region = region.ok_or_else(|| format!("missing region in shard '{s}'"))?;

    let mut config = ShardConfig::new(id, uri, region).with_capabilities(capabilities);
    if air_gapped {
        config = config.air_gapped();
    }
    if let Some(replica) = replica {
        config = config.with_replica(replica);
    }
    match (user, password) {
        (Some(user), Some(password)) => {
            config = config.with_credentials(Credentials::new(user, password));
        }
        (None, None) => {}
        _ => return Err(format!("user and password must be given together in shard '{s}'")),
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Parses a locality entry in format `region=shard`.
fn parse_locality(s: &str) -> Result<(RegionId, ShardId), String> {
    match s.split_once('=') {
        Some((region, shard)) if !region.is_empty() && !shard.is_empty() => {
            Ok((RegionId::new(region), ShardId::new(shard)))
        }
        _ => Err(format!("invalid locality '{s}', expected 'region=shard'")),
    }
}

/// Parses a vector index specification.
fn parse_vector_index(s: &str) -> Result<VectorIndexConfig, String> {
    s.parse().map_err(|e| format!("{e}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        shards = args.shards.len(),
        locality = args.locality.len(),
        vector_indexes = args.vector_indexes.len(),
        "Starting Meridian node"
    );

    let factory = Arc::new(SimulatedDriverFactory::new());
    let registry = Arc::new(ShardRegistry::new(factory));

    for config in args.shards {
        let id = config.id.clone();
        let outcome = registry.register_shard(config).await;
        if !outcome.is_live() {
            warn!(shard_id = %id, outcome = ?outcome, "Shard not available at startup");
        }
    }

    let strategy = LocalityAwarePartitionStrategy::from_registry(
        args.locality.into_iter().collect(),
        &registry,
    );
    info!(strategy = %strategy.describe(), "Partition strategy ready");
    let router_config = RouterConfig::default().with_failover_budget(args.failover_budget);
    let router = GraphRouter::with_config(Arc::clone(&registry), Arc::new(strategy), router_config)?;
    info!(failover_budget = router.config().failover_budget, "Router ready");

    let admin = AdminFanout::new(Arc::clone(&registry));
    for index in &args.vector_indexes {
        let report = admin.ensure(index, None).await?;
        info!(
            index = %index,
            applied = report.applied().len(),
            skipped = report.skipped().len(),
            failed = report.failed_shards().len(),
            "Vector index provisioned"
        );
    }

    let probe = router
        .broadcast_with_mode("RETURN 1", &QueryParams::new(), AccessMode::Read)
        .await;
    if probe.is_complete() {
        info!(shards = probe.len(), "All shards answered the startup probe");
    } else {
        warn!(failed = ?probe.failed_shards(), "Some shards failed the startup probe");
    }

    let mut replication_config = ReplicationConfig::default()
        .with_interval(Duration::from_millis(args.replication_interval_ms))
        .with_batch_limit(args.replication_batch);
    if let Some(primary) = args.primary {
        replication_config = replication_config.with_primary(primary);
    }
    let replication = ReplicationManager::new(
        Arc::clone(&registry),
        Arc::new(InMemoryCursorStore::new()),
        replication_config,
    )?;
    replication.start()?;
    info!(
        interval = ?replication.config().interval,
        batch_limit = replication.config().batch_limit,
        primary = ?replication.config().primary,
        "Replication configured"
    );

    info!("Meridian node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    replication.shutdown().await;
    registry.close_all().await;
    Ok(())
}
