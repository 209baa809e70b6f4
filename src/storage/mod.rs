//! Storage-side collaborators of repair
//!
//! The node owns namespaces, each owning a subset of shards. Repair drives
//! them through these narrow traits so the scheduler can run against any
//! storage engine (and against fakes in tests).

pub mod namespace;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::common::{Context, Result};
use crate::repair::metadata::{FetchBlocksMetadataOptions, FetchBlocksMetadataResult, PageToken};
use crate::repair::ShardRepairer;

pub use namespace::ShardedNamespace;

/// Hash partition of a namespace.
pub type ShardId = u32;

/// Identifier of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NamespaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A locally owned shard.
#[async_trait]
pub trait Shard: Send + Sync {
    fn id(&self) -> ShardId;

    /// Block metadata for `[start, end)`, at most `limit` series per page,
    /// resuming from `page_token`.
    async fn fetch_blocks_metadata(
        &self,
        ctx: &Context,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        page_token: Option<PageToken>,
        opts: FetchBlocksMetadataOptions,
    ) -> Result<FetchBlocksMetadataResult>;
}

/// A namespace owned by the node.
#[async_trait]
pub trait Namespace: Send + Sync {
    fn id(&self) -> &NamespaceId;

    /// Compare every owned shard's block starting at `t` with its peers.
    async fn repair(&self, repairer: Arc<dyn ShardRepairer>, t: DateTime<Utc>) -> Result<()>;
}

/// The node as seen by the repair scheduler.
pub trait Database: Send + Sync {
    /// Has local data finished its initial bootstrap?
    fn is_bootstrapped(&self) -> bool;

    /// Snapshot of the namespaces currently owned.
    fn owned_namespaces(&self) -> Vec<Arc<dyn Namespace>>;
}
