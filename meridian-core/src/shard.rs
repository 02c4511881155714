//! Durable shard descriptions.
//!
//! A `ShardConfig` is built once when a shard is registered and never
//! changes for the life of the process.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::limits::SHARD_ID_LENGTH_MAX;
use crate::types::{RegionId, ShardId};

// -----------------------------------------------------------------------------
// Capabilities
// -----------------------------------------------------------------------------

/// An optional engine feature a shard may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Approximate nearest-neighbour vector indexes.
    VectorIndex,
    /// Graph algorithm procedures (centrality, community detection, ...).
    GraphAlgorithms,
    /// Full-text indexes.
    FullTextIndex,
}

impl Capability {
    /// Returns the short name used in configuration strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VectorIndex => "vector",
            Self::GraphAlgorithms => "algorithms",
            Self::FullTextIndex => "fulltext",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "vector" | "vector_index" => Ok(Self::VectorIndex),
            "algorithms" | "graph_algorithms" => Ok(Self::GraphAlgorithms),
            "fulltext" | "full_text_index" => Ok(Self::FullTextIndex),
            other => Err(ConfigError::Parse {
                input: other.to_string(),
                message: "expected one of vector, algorithms, fulltext".to_string(),
            }),
        }
    }
}

/// The set of capabilities a shard advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    /// Creates an empty capability set.
    #[must_use]
    pub const fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Returns true if the capability is present.
    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Adds a capability.
    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    /// Returns true if no capability is advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for Capabilities {
    type Err = ConfigError;

    /// Parses a `+`-separated list such as `vector+algorithms`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('+')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse::<Capability>)
            .collect()
    }
}

// -----------------------------------------------------------------------------
// Credentials
// -----------------------------------------------------------------------------

/// Basic credentials for a shard connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password; never printed.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ShardConfig
// -----------------------------------------------------------------------------

/// Durable description of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Shard identifier, unique within the process.
    pub id: ShardId,
    /// Connection URI of the graph engine instance.
    pub uri: String,
    /// Optional credentials.
    pub credentials: Option<Credentials>,
    /// Region the shard is deployed in.
    pub region: RegionId,
    /// Whether the shard is isolated from live traffic and kept current
    /// only by one-way replication.
    #[serde(default)]
    pub air_gapped: bool,
    /// Optional engine features this shard supports.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Shard to fail over to when this shard has no live handle.
    #[serde(default)]
    pub replica: Option<ShardId>,
}

impl ShardConfig {
    /// Creates a live (not air-gapped) shard config with no credentials
    /// and no capabilities.
    #[must_use]
    pub fn new(id: impl Into<ShardId>, uri: impl Into<String>, region: impl Into<RegionId>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            credentials: None,
            region: region.into(),
            air_gapped: false,
            capabilities: Capabilities::none(),
            replica: None,
        }
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Marks the shard as air-gapped.
    #[must_use]
    pub fn air_gapped(mut self) -> Self {
        self.air_gapped = true;
        self
    }

    /// Sets the capability set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Adds one capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Names the replica to fail over to.
    #[must_use]
    pub fn with_replica(mut self, replica: impl Into<ShardId>) -> Self {
        self.replica = Some(replica.into());
        self
    }

    /// Returns true if the shard supports `capability`.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the id or uri is empty, the id is too long, or
    /// the shard names itself as its replica.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidShard {
            shard_id: self.id.to_string(),
            message: message.to_string(),
        };

        if self.id.is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.id.as_str().len() > SHARD_ID_LENGTH_MAX {
            return Err(invalid("id exceeds maximum length"));
        }
        if self.uri.trim().is_empty() {
            return Err(invalid("uri must not be empty"));
        }
        if self.replica.as_ref() == Some(&self.id) {
            return Err(invalid("shard cannot be its own replica"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_parse() {
        let caps: Capabilities = "vector+algorithms".parse().unwrap();
        assert!(caps.contains(Capability::VectorIndex));
        assert!(caps.contains(Capability::GraphAlgorithms));
        assert!(!caps.contains(Capability::FullTextIndex));

        let empty: Capabilities = "".parse().unwrap();
        assert!(empty.is_empty());

        assert!("vector+quantum".parse::<Capabilities>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("neo", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("neo"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_shard_config_builder() {
        let config = ShardConfig::new("edge-1", "bolt://edge-1:7687", "arctic")
            .air_gapped()
            .with_capability(Capability::VectorIndex)
            .with_replica("edge-2");

        assert!(config.air_gapped);
        assert!(config.supports(Capability::VectorIndex));
        assert!(!config.supports(Capability::GraphAlgorithms));
        assert_eq!(config.replica, Some(ShardId::new("edge-2")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shard_config_validation() {
        let empty_uri = ShardConfig::new("s1", " ", "us-east");
        assert!(matches!(
            empty_uri.validate(),
            Err(ConfigError::InvalidShard { .. })
        ));

        let empty_id = ShardConfig::new("", "bolt://x", "us-east");
        assert!(empty_id.validate().is_err());

        let self_replica = ShardConfig::new("s1", "bolt://x", "us-east").with_replica("s1");
        assert!(self_replica.validate().is_err());

        let long_id = ShardConfig::new("x".repeat(SHARD_ID_LENGTH_MAX + 1), "bolt://x", "r");
        assert!(long_id.validate().is_err());
    }

    #[test]
    fn test_shard_config_deserialize_defaults() {
        let json = r#"{"id":"s1","uri":"bolt://s1","credentials":null,"region":"us-east"}"#;
        let config: ShardConfig = serde_json::from_str(json).unwrap();
        assert!(!config.air_gapped);
        assert!(config.capabilities.is_empty());
        assert!(config.replica.is_none());
    }
}
