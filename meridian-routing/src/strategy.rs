//! Partition strategies - map a query context to a shard.
//!
//! Strategies are pure: the same context against the same strategy
//! instance always yields the same shard. Hash placement uses xxh3 with a
//! fixed seed over sorted candidates, so placement also survives restarts.

use std::collections::HashMap;
use std::fmt;

use meridian_core::{QueryContext, RegionId, ShardId};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{RoutingError, RoutingResult};
use crate::registry::ShardRegistry;

/// Policy mapping a query context to the shard that should serve it.
pub trait PartitionStrategy: Send + Sync + fmt::Debug {
    /// Resolves the target shard for `context`.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::NoShardsAvailable` if the strategy has no
    /// candidate to place the query on.
    fn resolve_shard(&self, context: &QueryContext) -> RoutingResult<ShardId>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

// -----------------------------------------------------------------------------
// Hash placement
// -----------------------------------------------------------------------------

/// Sorts and dedups candidates so placement does not depend on the order
/// shards were supplied in.
fn normalize(mut candidates: Vec<ShardId>) -> Vec<ShardId> {
    candidates.sort();
    candidates.dedup();
    candidates
}

/// Places a context on one of `candidates` by tenant hash, or by a hash of
/// the whole context when there is no tenant.
fn place_by_hash(candidates: &[ShardId], context: &QueryContext) -> RoutingResult<ShardId> {
    if candidates.is_empty() {
        return Err(RoutingError::NoShardsAvailable);
    }

    let hash = match &context.tenant_id {
        Some(tenant) => xxh3_64(tenant.as_str().as_bytes()),
        None => xxh3_64(&context.routing_key()),
    };
    // Safe cast: candidate lists are bounded by SHARDS_MAX.
    #[allow(clippy::cast_possible_truncation)]
    let index = (hash % candidates.len() as u64) as usize;
    Ok(candidates[index].clone())
}

/// Live, non-air-gapped shards from the registry.
fn routable_shards(registry: &ShardRegistry) -> Vec<ShardId> {
    registry
        .live_shards()
        .into_iter()
        .filter(|id| registry.get_shard_config(id).is_some_and(|c| !c.air_gapped))
        .collect()
}

// -----------------------------------------------------------------------------
// LocalityAwarePartitionStrategy
// -----------------------------------------------------------------------------

/// Prefers the shard mapped to the caller's region, falling back to tenant
/// hash placement.
#[derive(Debug, Clone, Default)]
pub struct LocalityAwarePartitionStrategy {
    locality: HashMap<RegionId, ShardId>,
    candidates: Vec<ShardId>,
}

impl LocalityAwarePartitionStrategy {
    /// Creates a strategy with a locality table and a fixed candidate set
    /// for the hash fallback.
    #[must_use]
    pub fn new(locality: HashMap<RegionId, ShardId>, candidates: Vec<ShardId>) -> Self {
        Self {
            locality,
            candidates: normalize(candidates),
        }
    }

    /// Creates a strategy whose fallback candidates are the registry's
    /// current live, non-air-gapped shards.
    ///
    /// The candidate set is captured once; call [`Self::with_candidates`]
    /// or rebuild the strategy to pick up later registrations.
    #[must_use]
    pub fn from_registry(locality: HashMap<RegionId, ShardId>, registry: &ShardRegistry) -> Self {
        Self::new(locality, routable_shards(registry))
    }

    /// Replaces the fallback candidate set.
    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<ShardId>) -> Self {
        self.candidates = normalize(candidates);
        self
    }

    /// Maps `region` to `shard`, replacing any earlier mapping.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<RegionId>, shard: impl Into<ShardId>) -> Self {
        self.locality.insert(region.into(), shard.into());
        self
    }

    /// Fallback candidates, sorted.
    #[must_use]
    pub fn candidates(&self) -> &[ShardId] {
        &self.candidates
    }
}

impl PartitionStrategy for LocalityAwarePartitionStrategy {
    fn resolve_shard(&self, context: &QueryContext) -> RoutingResult<ShardId> {
        if let Some(shard) = context
            .region
            .as_ref()
            .and_then(|region| self.locality.get(region))
        {
            return Ok(shard.clone());
        }
        place_by_hash(&self.candidates, context)
    }

    fn describe(&self) -> String {
        format!(
            "locality-aware ({} regions, {} candidates)",
            self.locality.len(),
            self.candidates.len()
        )
    }
}

// -----------------------------------------------------------------------------
// HashPartitionStrategy
// -----------------------------------------------------------------------------

/// Pure tenant-hash placement; ignores the region.
#[derive(Debug, Clone, Default)]
pub struct HashPartitionStrategy {
    candidates: Vec<ShardId>,
}

impl HashPartitionStrategy {
    /// Creates a strategy over a fixed candidate set.
    #[must_use]
    pub fn new(candidates: Vec<ShardId>) -> Self {
        Self {
            candidates: normalize(candidates),
        }
    }

    /// Creates a strategy over the registry's live, non-air-gapped shards.
    #[must_use]
    pub fn from_registry(registry: &ShardRegistry) -> Self {
        Self::new(routable_shards(registry))
    }
}

impl PartitionStrategy for HashPartitionStrategy {
    fn resolve_shard(&self, context: &QueryContext) -> RoutingResult<ShardId> {
        place_by_hash(&self.candidates, context)
    }

    fn describe(&self) -> String {
        format!("hash ({} candidates)", self.candidates.len())
    }
}

// -----------------------------------------------------------------------------
// StaticPartitionStrategy
// -----------------------------------------------------------------------------

/// Sends every query to one shard.
#[derive(Debug, Clone)]
pub struct StaticPartitionStrategy {
    shard: ShardId,
}

impl StaticPartitionStrategy {
    /// Creates a strategy pinned to `shard`.
    #[must_use]
    pub fn new(shard: impl Into<ShardId>) -> Self {
        Self {
            shard: shard.into(),
        }
    }
}

impl PartitionStrategy for StaticPartitionStrategy {
    fn resolve_shard(&self, _context: &QueryContext) -> RoutingResult<ShardId> {
        Ok(self.shard.clone())
    }

    fn describe(&self) -> String {
        format!("static ({})", self.shard)
    }
}
