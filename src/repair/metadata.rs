//! Block metadata exchanged during repair
//!
//! Repairs never move raw data; replicas are compared by the size and
//! checksum each one reports for every (series, block) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::crc32;
use crate::common::Result;

/// Identifier of one time series within a namespace.
pub type SeriesId = String;

/// Continuation token for paged local metadata fetches.
pub type PageToken = u64;

/// Identity of one node in a replica set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Size and checksum of one block of one series, as reported by one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub start: DateTime<Utc>,
    pub size: i64,
    pub checksum: Option<u32>,
}

impl BlockMetadata {
    pub fn new(start: DateTime<Utc>, size: i64, checksum: Option<u32>) -> Self {
        Self {
            start,
            size,
            checksum,
        }
    }

    /// Metadata describing an encoded block held in memory.
    pub fn from_bytes(start: DateTime<Utc>, data: &[u8]) -> Self {
        Self {
            start,
            size: data.len() as i64,
            checksum: Some(crc32(data)),
        }
    }
}

/// Which fields a local metadata fetch should fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchBlocksMetadataOptions {
    pub include_sizes: bool,
    pub include_checksums: bool,
}

impl Default for FetchBlocksMetadataOptions {
    fn default() -> Self {
        Self {
            include_sizes: true,
            include_checksums: true,
        }
    }
}

/// One block of a local fetch; `err` is set when the block could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBlockMetadata {
    pub start: DateTime<Utc>,
    pub size: Option<i64>,
    pub checksum: Option<u32>,
    pub last_read: Option<DateTime<Utc>>,
    pub err: Option<String>,
}

impl From<BlockMetadata> for FetchBlockMetadata {
    fn from(block: BlockMetadata) -> Self {
        Self {
            start: block.start,
            size: Some(block.size),
            checksum: block.checksum,
            last_read: None,
            err: None,
        }
    }
}

/// All fetched blocks of one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesBlocksMetadata {
    pub id: SeriesId,
    pub blocks: Vec<FetchBlockMetadata>,
}

/// One page of a local shard's block metadata.
#[derive(Debug, Clone, Default)]
pub struct FetchBlocksMetadataResult {
    pub series: Vec<SeriesBlocksMetadata>,
    pub next_page_token: Option<PageToken>,
}

/// Flattens a local fetch into `(series, block)` pairs, dropping blocks that
/// failed to read.
pub struct FilteredBlocksMetadataIter {
    series: std::vec::IntoIter<SeriesBlocksMetadata>,
    current: Option<(SeriesId, std::vec::IntoIter<FetchBlockMetadata>)>,
}

impl FilteredBlocksMetadataIter {
    pub fn new(result: FetchBlocksMetadataResult) -> Self {
        Self {
            series: result.series.into_iter(),
            current: None,
        }
    }
}

impl Iterator for FilteredBlocksMetadataIter {
    type Item = (SeriesId, BlockMetadata);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((id, blocks)) = &mut self.current {
                for block in blocks.by_ref() {
                    if block.err.is_some() {
                        continue;
                    }
                    let metadata =
                        BlockMetadata::new(block.start, block.size.unwrap_or(0), block.checksum);
                    return Some((id.clone(), metadata));
                }
            }
            let next = self.series.next()?;
            self.current = Some((next.id, next.blocks.into_iter()));
        }
    }
}

/// One block reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBlockMetadata {
    pub host: HostId,
    pub id: SeriesId,
    pub block: BlockMetadata,
}

/// Streams peer metadata; an `Err` item ends the stream.
pub type PeerMetadataIter = Box<dyn Iterator<Item = Result<PeerBlockMetadata>> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_from_bytes() {
        let block = BlockMetadata::from_bytes(at(0), b"datapoints");
        assert_eq!(block.size, 10);
        assert_eq!(block.checksum, Some(crc32(b"datapoints")));
    }

    #[test]
    fn test_filtered_iter_skips_errored_blocks_and_empty_series() {
        let result = FetchBlocksMetadataResult {
            series: vec![
                SeriesBlocksMetadata {
                    id: "cpu".into(),
                    blocks: vec![
                        BlockMetadata::new(at(0), 10, Some(1)).into(),
                        FetchBlockMetadata {
                            start: at(7200),
                            size: None,
                            checksum: None,
                            last_read: None,
                            err: Some("corrupt".into()),
                        },
                    ],
                },
                SeriesBlocksMetadata {
                    id: "empty".into(),
                    blocks: vec![],
                },
                SeriesBlocksMetadata {
                    id: "mem".into(),
                    blocks: vec![FetchBlockMetadata {
                        start: at(0),
                        size: None,
                        checksum: Some(9),
                        last_read: None,
                        err: None,
                    }],
                },
            ],
            next_page_token: None,
        };

        let items: Vec<_> = FilteredBlocksMetadataIter::new(result).collect();
        assert_eq!(
            items,
            vec![
                ("cpu".to_string(), BlockMetadata::new(at(0), 10, Some(1))),
                ("mem".to_string(), BlockMetadata::new(at(0), 0, Some(9))),
            ]
        );
    }
}
