//! Administrative fan-out - apply one idempotent statement to one shard or
//! to every shard.
//!
//! A named shard fails loudly. The all-shards path runs concurrently and
//! records each shard's outcome, so one unreachable shard never blocks
//! provisioning of the rest.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use meridian_core::{AccessMode, Capability, ConfigError, ShardId};
use meridian_driver::QueryParams;
use tracing::{debug, info, warn};

use crate::error::{RoutingError, RoutingResult};
use crate::registry::ShardRegistry;
use crate::router::{panic_message, run_in_session};

/// Largest vector dimension accepted for an index.
pub const VECTOR_DIMENSIONS_MAX: u32 = 4_096;

// -----------------------------------------------------------------------------
// AdminStatement
// -----------------------------------------------------------------------------

/// An idempotent administrative statement.
pub trait AdminStatement: Send + Sync {
    /// Statement text. Must be safe to run more than once.
    fn statement(&self) -> String;

    /// Statement parameters.
    fn params(&self) -> QueryParams {
        QueryParams::new()
    }

    /// Capability a shard needs to accept the statement.
    fn required_capability(&self) -> Option<Capability> {
        None
    }

    /// Short description for logs.
    fn describe(&self) -> String;
}

// -----------------------------------------------------------------------------
// VectorIndexConfig
// -----------------------------------------------------------------------------

/// Similarity function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityFunction {
    /// Cosine similarity.
    #[default]
    Cosine,
    /// Euclidean distance.
    Euclidean,
}

impl SimilarityFunction {
    /// Name used in index options.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
        }
    }
}

impl FromStr for SimilarityFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            other => Err(ConfigError::Parse {
                input: other.to_string(),
                message: "expected cosine or euclidean".to_string(),
            }),
        }
    }
}

/// A vector index on one node label and property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorIndexConfig {
    /// Index name.
    pub name: String,
    /// Node label.
    pub label: String,
    /// Embedding property.
    pub property: String,
    /// Embedding dimensions.
    pub dimensions: u32,
    /// Similarity function.
    pub similarity: SimilarityFunction,
}

impl VectorIndexConfig {
    /// Creates a cosine-similarity index config.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        property: impl Into<String>,
        dimensions: u32,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            property: property.into(),
            dimensions,
            similarity: SimilarityFunction::Cosine,
        }
    }

    /// Sets the similarity function.
    #[must_use]
    pub const fn with_similarity(mut self, similarity: SimilarityFunction) -> Self {
        self.similarity = similarity;
        self
    }

    /// Validates the config.
    ///
    /// Names are spliced into the statement text, so they are restricted to
    /// ASCII identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is not an identifier or the dimensions are
    /// out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("name", &self.name),
            ("label", &self.label),
            ("property", &self.property),
        ] {
            if !is_identifier(value) {
                return Err(ConfigError::Parse {
                    input: value.clone(),
                    message: format!("vector index {field} must be an identifier"),
                });
            }
        }
        if self.dimensions == 0 || self.dimensions > VECTOR_DIMENSIONS_MAX {
            return Err(ConfigError::OutOfRange {
                field: "dimensions",
                message: format!(
                    "{} not in 1..={VECTOR_DIMENSIONS_MAX}",
                    self.dimensions
                ),
            });
        }
        Ok(())
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for VectorIndexConfig {
    type Err = ConfigError;

    /// Parses `name:Label:property:dimensions[:similarity]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = |message: &str| ConfigError::Parse {
            input: s.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = s.split(':').collect();
        let (name, label, property, dimensions) = match parts.as_slice() {
            [name, label, property, dimensions] | [name, label, property, dimensions, _] => {
                (*name, *label, *property, *dimensions)
            }
            _ => return Err(parse_err("expected name:Label:property:dimensions[:similarity]")),
        };
        let dimensions = dimensions
            .parse::<u32>()
            .map_err(|_| parse_err("dimensions must be a positive integer"))?;

        let mut config = Self::new(name, label, property, dimensions);
        if let Some(similarity) = parts.get(4) {
            config.similarity = similarity.parse()?;
        }
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for VectorIndexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on :{}({}) [{}d {}]",
            self.name,
            self.label,
            self.property,
            self.dimensions,
            self.similarity.as_str()
        )
    }
}

impl AdminStatement for VectorIndexConfig {
    fn statement(&self) -> String {
        format!(
            "CREATE VECTOR INDEX {name} IF NOT EXISTS FOR (n:{label}) ON (n.{property}) \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {dimensions}, \
             `vector.similarity_function`: '{similarity}'}}}}",
            name = self.name,
            label = self.label,
            property = self.property,
            dimensions = self.dimensions,
            similarity = self.similarity.as_str(),
        )
    }

    fn required_capability(&self) -> Option<Capability> {
        Some(Capability::VectorIndex)
    }

    fn describe(&self) -> String {
        format!("vector index {self}")
    }
}

// -----------------------------------------------------------------------------
// Fan-out results
// -----------------------------------------------------------------------------

/// What happened on one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutStatus {
    /// The statement ran.
    Applied,
    /// The shard lacks a required capability and was left alone.
    Skipped {
        /// Why the shard was skipped.
        reason: String,
    },
    /// The statement failed on this shard.
    Failed {
        /// The failure.
        error: RoutingError,
    },
}

/// One shard's fan-out result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutEntry {
    /// The shard.
    pub shard_id: ShardId,
    /// What happened.
    pub status: FanoutStatus,
}

/// Per-shard results of an admin fan-out, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// One entry per shard attempted.
    pub entries: Vec<FanoutEntry>,
}

impl FanoutReport {
    /// Shards the statement was applied to.
    #[must_use]
    pub fn applied(&self) -> Vec<ShardId> {
        self.filter(|s| matches!(s, FanoutStatus::Applied))
    }

    /// Shards skipped for a missing capability.
    #[must_use]
    pub fn skipped(&self) -> Vec<ShardId> {
        self.filter(|s| matches!(s, FanoutStatus::Skipped { .. }))
    }

    /// Shards the statement failed on.
    #[must_use]
    pub fn failed_shards(&self) -> Vec<ShardId> {
        self.filter(|s| matches!(s, FanoutStatus::Failed { .. }))
    }

    /// Returns true if no shard failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries
            .iter()
            .all(|e| !matches!(e.status, FanoutStatus::Failed { .. }))
    }

    fn filter(&self, pred: impl Fn(&FanoutStatus) -> bool) -> Vec<ShardId> {
        self.entries
            .iter()
            .filter(|e| pred(&e.status))
            .map(|e| e.shard_id.clone())
            .collect()
    }
}

// -----------------------------------------------------------------------------
// AdminFanout
// -----------------------------------------------------------------------------

/// Applies administrative statements across the registry.
#[derive(Debug, Clone)]
pub struct AdminFanout {
    registry: Arc<ShardRegistry>,
}

impl AdminFanout {
    /// Creates a fan-out service over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<ShardRegistry>) -> Self {
        Self { registry }
    }

    /// Applies `statement` to one shard, or to every registered shard when
    /// `shard_id` is `None`.
    ///
    /// # Errors
    ///
    /// Only when `shard_id` is given: `ShardUnavailable`,
    /// `CapabilityMissing`, `Driver` or `SessionPanicked` for that shard.
    /// The all-shards path records failures in the report instead.
    pub async fn ensure(
        &self,
        statement: &dyn AdminStatement,
        shard_id: Option<&ShardId>,
    ) -> RoutingResult<FanoutReport> {
        match shard_id {
            Some(shard_id) => {
                self.apply_on(statement, shard_id).await.inspect_err(|e| {
                    warn!(shard_id = %shard_id, what = %statement.describe(), error = %e, "Admin statement failed");
                })?;
                info!(shard_id = %shard_id, what = %statement.describe(), "Admin statement applied");
                Ok(FanoutReport {
                    entries: vec![FanoutEntry {
                        shard_id: shard_id.clone(),
                        status: FanoutStatus::Applied,
                    }],
                })
            }
            None => Ok(self.ensure_all(statement).await),
        }
    }

    async fn ensure_all(&self, statement: &dyn AdminStatement) -> FanoutReport {
        let shards = self.registry.get_all_shards();
        let what = statement.describe();

        let futures = shards.into_iter().map(|shard_id| {
            let what = &what;
            async move {
                let status = match self.apply_on(statement, &shard_id).await {
                    Ok(()) => {
                        debug!(shard_id = %shard_id, what = %what, "Admin statement applied");
                        FanoutStatus::Applied
                    }
                    Err(RoutingError::CapabilityMissing { capability, .. }) => {
                        debug!(shard_id = %shard_id, what = %what, %capability, "Admin statement skipped");
                        FanoutStatus::Skipped {
                            reason: format!("missing capability {capability}"),
                        }
                    }
                    Err(error) => {
                        warn!(shard_id = %shard_id, what = %what, error = %error, "Admin statement failed");
                        FanoutStatus::Failed { error }
                    }
                };
                FanoutEntry { shard_id, status }
            }
        });
        let report = FanoutReport {
            entries: futures::future::join_all(futures).await,
        };

        info!(
            what = %what,
            applied = report.applied().len(),
            skipped = report.skipped().len(),
            failed = report.failed_shards().len(),
            "Admin fan-out finished"
        );
        report
    }

    async fn apply_on(&self, statement: &dyn AdminStatement, shard_id: &ShardId) -> RoutingResult<()> {
        let unavailable = || RoutingError::ShardUnavailable {
            shard_id: shard_id.clone(),
        };
        let config = self.registry.get_shard_config(shard_id).ok_or_else(unavailable)?;
        if let Some(capability) = statement.required_capability() {
            if !config.supports(capability) {
                return Err(RoutingError::CapabilityMissing {
                    shard_id: shard_id.clone(),
                    capability,
                });
            }
        }
        let driver = self.registry.get_driver(shard_id).ok_or_else(unavailable)?;

        let query = statement.statement();
        let params = statement.params();
        match run_in_session(shard_id, driver.as_ref(), AccessMode::Write, &query, &params).await {
            Ok(result) => result.map(|_| ()),
            Err(payload) => Err(RoutingError::SessionPanicked {
                shard_id: shard_id.clone(),
                message: panic_message(&payload),
            }),
        }
    }
}
