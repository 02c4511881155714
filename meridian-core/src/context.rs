//! Per-call query context.
//!
//! Request handlers build a `QueryContext` after authentication; by the time
//! it reaches the router it is trusted and never mutated.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::types::{AccessMode, RegionId, TenantId};

/// Field tags for `QueryContext::routing_key`. Changing these changes
/// tenant-less placement for every existing caller.
const TAG_TENANT: u8 = 0x01;
const TAG_REGION: u8 = 0x02;
const TAG_WRITE: u8 = 0x03;
const TAG_VECTOR: u8 = 0x04;
const TAG_NODE: u8 = 0x05;

/// Caller-supplied routing hints for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Tenant the query runs for.
    pub tenant_id: Option<TenantId>,
    /// Preferred region.
    pub region: Option<RegionId>,
    /// Write intent; `false` opens a read session.
    #[serde(default)]
    pub write: bool,
    /// Whether the query performs a vector search.
    pub vector_search: Option<bool>,
    /// Explicit node ids the query touches.
    pub node_ids: Option<Vec<String>>,
}

impl QueryContext {
    /// Creates an empty read context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<TenantId>) -> Self {
        self.tenant_id = Some(tenant.into());
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<RegionId>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the write intent.
    #[must_use]
    pub const fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Flags the query as a vector search.
    #[must_use]
    pub const fn with_vector_search(mut self, vector_search: bool) -> Self {
        self.vector_search = Some(vector_search);
        self
    }

    /// Sets the explicit node ids.
    #[must_use]
    pub fn with_node_ids<I, S>(mut self, node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_ids = Some(node_ids.into_iter().map(Into::into).collect());
        self
    }

    /// Session access mode implied by the write intent.
    #[must_use]
    pub const fn access_mode(&self) -> AccessMode {
        AccessMode::from_write_intent(self.write)
    }

    /// Returns true if the caller flagged a vector search.
    #[must_use]
    pub fn is_vector_search(&self) -> bool {
        self.vector_search.unwrap_or(false)
    }

    /// Deterministic byte encoding of the whole context.
    ///
    /// Each present field is written as `tag | len (u32 LE) | bytes`, in a
    /// fixed order, so equal contexts always produce equal keys regardless
    /// of process or platform.
    #[must_use]
    pub fn routing_key(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);

        if let Some(tenant) = &self.tenant_id {
            put_field(&mut buf, TAG_TENANT, tenant.as_str().as_bytes());
        }
        if let Some(region) = &self.region {
            put_field(&mut buf, TAG_REGION, region.as_str().as_bytes());
        }
        put_field(&mut buf, TAG_WRITE, &[u8::from(self.write)]);
        if let Some(vector) = self.vector_search {
            put_field(&mut buf, TAG_VECTOR, &[u8::from(vector)]);
        }
        if let Some(nodes) = &self.node_ids {
            for node in nodes {
                put_field(&mut buf, TAG_NODE, node.as_bytes());
            }
        }

        buf.freeze()
    }
}

fn put_field(buf: &mut BytesMut, tag: u8, value: &[u8]) {
    // Safe cast: context fields are short identifiers, far below u32::MAX.
    #[allow(clippy::cast_possible_truncation)]
    let len = value.len() as u32;
    buf.put_u8(tag);
    buf.put_u32_le(len);
    buf.put_slice(value);
}
