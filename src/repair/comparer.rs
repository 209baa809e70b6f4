//! Replica metadata comparison
//!
//! Collects the block metadata every replica reports for one shard and time
//! block, then classifies each (series, block):
//!
//! - **size difference**: fewer hosts reported the block than there are
//!   a member of the replica set did not report the block, or two hosts
//!   reported different sizes;
//! - **checksum difference**: sizes agree, but a host reported no checksum or
//!   two hosts reported different checksums.
//!
//! A block is never counted under both: a size mismatch already implies the
//! contents differ, so checksums are only consulted once sizes agree.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::common::{RepairOptions, Result};
use crate::repair::metadata::{
    BlockMetadata, FilteredBlocksMetadataIter, HostId, PeerMetadataIter, SeriesId,
};

/// Accumulates local and peer metadata for one comparison.
pub trait MetadataComparer: Send {
    /// Add the origin's own blocks.
    fn add_local_metadata(&mut self, origin: &HostId, iter: FilteredBlocksMetadataIter);

    /// Add peer blocks; stops at, and returns, the first error in the stream.
    fn add_peer_metadata(&mut self, iter: PeerMetadataIter) -> Result<()>;

    fn compare(&self) -> MetadataComparisonResult;

    /// Release accumulated state.
    fn close(&mut self);
}

/// Builds a comparer scoped to a replica set.
pub type ComparerFactory =
    Arc<dyn Fn(&[HostId], &RepairOptions) -> Box<dyn MetadataComparer> + Send + Sync>;

pub fn default_comparer_factory() -> ComparerFactory {
    Arc::new(|replicas: &[HostId], _opts: &RepairOptions| {
        Box::new(ReplicaMetadataComparer::new(replicas)) as Box<dyn MetadataComparer>
    })
}

/// What one host reported for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBlockMetadata {
    pub host: HostId,
    pub size: i64,
    pub checksum: Option<u32>,
}

type BlockReplicas = BTreeMap<DateTime<Utc>, Vec<HostBlockMetadata>>;

/// A set of (series, block) pairs with every host's report for each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaSeriesMetadata {
    series: BTreeMap<SeriesId, BlockReplicas>,
}

impl ReplicaSeriesMetadata {
    pub fn num_series(&self) -> u64 {
        self.series.len() as u64
    }

    pub fn num_blocks(&self) -> u64 {
        self.series.values().map(|blocks| blocks.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn contains(&self, series: &str, start: DateTime<Utc>) -> bool {
        self.series
            .get(series)
            .is_some_and(|blocks| blocks.contains_key(&start))
    }

    /// Every host's report for one block, sorted by host.
    pub fn get(&self, series: &str, start: DateTime<Utc>) -> Option<&[HostBlockMetadata]> {
        self.series
            .get(series)
            .and_then(|blocks| blocks.get(&start))
            .map(Vec::as_slice)
    }

    pub fn series(&self) -> impl Iterator<Item = &SeriesId> {
        self.series.keys()
    }

    fn insert(&mut self, series: &SeriesId, start: DateTime<Utc>, hosts: Vec<HostBlockMetadata>) {
        self.series
            .entry(series.clone())
            .or_default()
            .insert(start, hosts);
    }
}

/// Outcome of comparing one shard and block across replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataComparisonResult {
    /// Series seen on any replica
    pub num_series: u64,
    /// (series, block) pairs seen on any replica
    pub num_blocks: u64,
    pub size_differences: ReplicaSeriesMetadata,
    pub checksum_differences: ReplicaSeriesMetadata,
}

/// In-memory comparer keyed by series then block start.
#[derive(Debug)]
pub struct ReplicaMetadataComparer {
    replicas: Vec<HostId>,
    series: HashMap<SeriesId, BlockReplicas>,
}

impl ReplicaMetadataComparer {
    pub fn new(replicas: &[HostId]) -> Self {
        Self {
            replicas: replicas.to_vec(),
            series: HashMap::new(),
        }
    }

    fn add(&mut self, host: &HostId, id: SeriesId, block: BlockMetadata) {
        let hosts = self
            .series
            .entry(id)
            .or_default()
            .entry(block.start)
            .or_default();
        let report = HostBlockMetadata {
            host: host.clone(),
            size: block.size,
            checksum: block.checksum,
        };
        match hosts.iter_mut().find(|h| h.host == *host) {
            Some(existing) => *existing = report,
            None => hosts.push(report),
        }
    }

    fn sizes_differ(&self, hosts: &[HostBlockMetadata]) -> bool {
        let missing_replica = self
            .replicas
            .iter()
            .any(|replica| !hosts.iter().any(|h| h.host == *replica));
        if missing_replica {
            return true;
        }
        hosts.windows(2).any(|pair| pair[0].size != pair[1].size)
    }

    fn checksums_differ(hosts: &[HostBlockMetadata]) -> bool {
        hosts.iter().any(|h| h.checksum.is_none())
            || hosts.windows(2).any(|pair| pair[0].checksum != pair[1].checksum)
    }
}

impl MetadataComparer for ReplicaMetadataComparer {
    fn add_local_metadata(&mut self, origin: &HostId, iter: FilteredBlocksMetadataIter) {
        for (id, block) in iter {
            self.add(origin, id, block);
        }
    }

    fn add_peer_metadata(&mut self, iter: PeerMetadataIter) -> Result<()> {
        for item in iter {
            let peer = item?;
            self.add(&peer.host, peer.id, peer.block);
        }
        Ok(())
    }

    fn compare(&self) -> MetadataComparisonResult {
        let mut result = MetadataComparisonResult {
            num_series: self.series.len() as u64,
            ..Default::default()
        };

        for (id, blocks) in &self.series {
            for (start, hosts) in blocks {
                result.num_blocks += 1;

                let mut hosts = hosts.clone();
                hosts.sort_by(|a, b| a.host.cmp(&b.host));

                if self.sizes_differ(&hosts) {
                    result.size_differences.insert(id, *start, hosts);
                } else if Self::checksums_differ(&hosts) {
                    result.checksum_differences.insert(id, *start, hosts);
                }
            }
        }

        result
    }

    fn close(&mut self) {
        self.series = HashMap::new();
    }
}
