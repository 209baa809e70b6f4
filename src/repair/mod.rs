//! Anti-entropy repair
//!
//! - [`shard`]: compares one shard's block with every replica by metadata
//! - [`database`]: schedules passes over the retention window with bounded retries
//! - [`comparer`]: classifies size and checksum differences across replicas

pub mod client;
pub mod comparer;
pub mod database;
pub mod ledger;
pub mod metadata;
pub mod options;
pub mod schedule;
pub mod shard;

pub use client::{AdminClient, AdminSession};
pub use comparer::{MetadataComparer, MetadataComparisonResult, ReplicaMetadataComparer};
pub use database::DatabaseRepairer;
pub use ledger::{RepairLedger, RepairState, RepairStatus};
pub use metadata::{BlockMetadata, HostId, PeerBlockMetadata, PeerMetadataIter};
pub use options::Options;
pub use schedule::IntervalSchedule;
pub use shard::{DefaultShardRepairer, ShardRepairer};
