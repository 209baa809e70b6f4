//! Span names for tracing, formatted as `package.object.method`
//! (or `package.method` when there is no object).

/// One full repair pass over the retention window.
pub const DB_REPAIR: &str = "storage.dbRepairer.Repair";

/// Repair of every owned namespace for one block start.
pub const DB_REPAIR_WITH_TIME: &str = "storage.dbRepairer.repairWithTime";

/// Repair of every owned shard of one namespace.
pub const NS_REPAIR: &str = "storage.dbNamespace.Repair";

/// Metadata comparison of one shard and block against its peers.
pub const SHARD_REPAIR: &str = "storage.shardRepairer.Repair";
