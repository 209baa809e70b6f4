//! Peer access used by repairs
//!
//! The network client is provided by the node; repair only needs the replica
//! topology of a shard and a stream of the metadata its peers hold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::common::Result;
use crate::repair::metadata::{HostId, PeerMetadataIter};
use crate::storage::{NamespaceId, ShardId};

/// Hands out the session used to talk to peers.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// The shared admin session; fails with `Error::SessionUnavailable` when
    /// no session can be established.
    async fn default_admin_session(&self) -> Result<Arc<dyn AdminSession>>;
}

/// A connection to the cluster, bound to the current topology.
#[async_trait]
pub trait AdminSession: Send + Sync {
    /// This node's identity.
    fn origin(&self) -> HostId;

    /// Every host in the replica set, origin included.
    fn replicas(&self) -> Vec<HostId>;

    /// Block metadata held by every replica except the origin for
    /// `[start, end)` of one shard.
    async fn fetch_blocks_metadata_from_peers(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeerMetadataIter>;
}
