//! Namespace that repairs its owned shards

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::Instrument;

use crate::common::{tracepoint, Context, Error, MultiError, Result};
use crate::repair::comparer::MetadataComparisonResult;
use crate::repair::ShardRepairer;
use crate::storage::{Namespace, NamespaceId, Shard, ShardId};

/// Totals across the shards of one namespace repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub shards_repaired: u64,
    pub shards_failed: u64,
    pub series: u64,
    pub blocks: u64,
    pub size_diff_series: u64,
    pub size_diff_blocks: u64,
    pub checksum_diff_series: u64,
    pub checksum_diff_blocks: u64,
}

impl RepairSummary {
    fn add(&mut self, res: &MetadataComparisonResult) {
        self.shards_repaired += 1;
        self.series += res.num_series;
        self.blocks += res.num_blocks;
        self.size_diff_series += res.size_differences.num_series();
        self.size_diff_blocks += res.size_differences.num_blocks();
        self.checksum_diff_series += res.checksum_differences.num_series();
        self.checksum_diff_blocks += res.checksum_differences.num_blocks();
    }
}

/// A namespace holding a changing set of shards.
pub struct ShardedNamespace {
    id: NamespaceId,
    shards: RwLock<Vec<Arc<dyn Shard>>>,
}

impl ShardedNamespace {
    pub fn new(id: NamespaceId, shards: Vec<Arc<dyn Shard>>) -> Self {
        Self {
            id,
            shards: RwLock::new(shards),
        }
    }

    /// Replace the owned shard set after a topology change.
    pub fn assign_shards(&self, shards: Vec<Arc<dyn Shard>>) {
        *self.shards.write().unwrap_or_else(PoisonError::into_inner) = shards;
    }

    pub fn owned_shards(&self) -> Vec<Arc<dyn Shard>> {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Compare every owned shard, at most `repair_shard_concurrency` at a time.
    /// Every shard is attempted; failures are collected.
    pub async fn repair_shards(
        &self,
        repairer: Arc<dyn ShardRepairer>,
        t: DateTime<Utc>,
    ) -> (RepairSummary, Result<()>) {
        let shards = self.owned_shards();
        let concurrency = repairer.options().repair_shard_concurrency.max(1);
        let throttle = repairer.options().repair_throttle;

        // built eagerly and boxed so the fan-out future stays Send
        let pending: Vec<BoxFuture<'static, (ShardId, Result<MetadataComparisonResult>)>> =
            shards
                .into_iter()
                .map(|shard: Arc<dyn Shard>| {
                    let repairer = Arc::clone(&repairer);
                    let namespace = self.id.clone();
                    async move {
                        // per-shard context: comparer state is released when the shard finishes
                        let ctx = Context::new();
                        let res = repairer.repair(&ctx, &namespace, t, shard.as_ref()).await;
                        ctx.close();
                        if !throttle.is_zero() {
                            tokio::time::sleep(throttle).await;
                        }
                        (shard.id(), res)
                    }
                    .boxed()
                })
                .collect();

        let results: Vec<(ShardId, Result<MetadataComparisonResult>)> = stream::iter(pending)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = RepairSummary::default();
        let mut multi_err = MultiError::new();
        for (shard, res) in results {
            match res {
                Ok(res) => summary.add(&res),
                Err(e) => {
                    summary.shards_failed += 1;
                    tracing::warn!(
                        "Repair of namespace {} shard {} at {} failed: {}",
                        self.id,
                        shard,
                        t,
                        e
                    );
                    multi_err.add(Error::ShardRepair {
                        shard,
                        source: Box::new(e),
                    });
                }
            }
        }

        (summary, multi_err.final_error())
    }
}

#[async_trait]
impl Namespace for ShardedNamespace {
    fn id(&self) -> &NamespaceId {
        &self.id
    }

    async fn repair(&self, repairer: Arc<dyn ShardRepairer>, t: DateTime<Utc>) -> Result<()> {
        let span = tracing::info_span!(tracepoint::NS_REPAIR, namespace = %self.id, time = %t);
        let (summary, res) = self.repair_shards(repairer, t).instrument(span).await;

        tracing::info!(
            "Repair of namespace {} at {}: {} shards ok, {} failed, {} series, {} blocks, {} size-diff series, {} size-diff blocks, {} checksum-diff series, {} checksum-diff blocks",
            self.id,
            t,
            summary.shards_repaired,
            summary.shards_failed,
            summary.series,
            summary.blocks,
            summary.size_diff_series,
            summary.size_diff_blocks,
            summary.checksum_diff_series,
            summary.checksum_diff_blocks
        );

        res
    }
}
