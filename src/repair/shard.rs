//! Shard repairer: one metadata comparison of a local shard against its peers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::common::{
    add_duration, tracepoint, Context, Error, RepairOptions, Result, RetentionOptions, Scope,
};
use crate::repair::client::AdminClient;
use crate::repair::comparer::{
    default_comparer_factory, ComparerFactory, MetadataComparer, MetadataComparisonResult,
};
use crate::repair::metadata::{FetchBlocksMetadataOptions, FilteredBlocksMetadataIter, HostId};
use crate::storage::{NamespaceId, Shard, ShardId};

/// Series requested per local metadata page.
const LOCAL_FETCH_LIMIT: usize = usize::MAX;

/// Compares one shard's block with every replica of it.
#[async_trait]
pub trait ShardRepairer: Send + Sync {
    fn options(&self) -> &RepairOptions;

    /// Compare `[t, t + block_size)` of `shard` with its peers. Resources that
    /// outlive the comparison are released when `ctx` closes.
    async fn repair(
        &self,
        ctx: &Context,
        namespace: &NamespaceId,
        t: DateTime<Utc>,
        shard: &dyn Shard,
    ) -> Result<MetadataComparisonResult>;
}

pub struct DefaultShardRepairer {
    options: RepairOptions,
    client: Arc<dyn AdminClient>,
    comparer_factory: ComparerFactory,
    scope: Scope,
    block_size: Duration,
}

impl DefaultShardRepairer {
    pub fn new(
        options: RepairOptions,
        retention: &RetentionOptions,
        client: Arc<dyn AdminClient>,
        scope: &Scope,
        host: &str,
    ) -> Self {
        Self {
            options,
            client,
            comparer_factory: default_comparer_factory(),
            scope: scope.sub_scope("database.repair").tagged(&[("host", host)]),
            block_size: retention.block_size,
        }
    }

    pub fn with_comparer_factory(mut self, factory: ComparerFactory) -> Self {
        self.comparer_factory = factory;
        self
    }

    async fn repair_shard(
        &self,
        ctx: &Context,
        namespace: &NamespaceId,
        t: DateTime<Utc>,
        shard: &dyn Shard,
    ) -> Result<MetadataComparisonResult> {
        let session = self
            .client
            .default_admin_session()
            .await
            .map_err(|e| match e {
                Error::SessionUnavailable(_) => e,
                other => Error::SessionUnavailable(other.to_string()),
            })?;

        let start = t;
        let end = add_duration(t, self.block_size);
        let origin = session.origin();
        let replicas = session.replicas();

        let mut comparer = (self.comparer_factory)(&replicas, &self.options);
        let compared = async {
            self.add_local_metadata(ctx, comparer.as_mut(), &origin, shard, start, end)
                .await?;

            ctx.check_cancelled()?;
            let peer_iter = session
                .fetch_blocks_metadata_from_peers(namespace, shard.id(), start, end)
                .await
                .map_err(|e| fetch_error("peer metadata", e))?;
            comparer
                .add_peer_metadata(peer_iter)
                .map_err(|e| fetch_error("peer metadata", e))?;

            Ok::<_, Error>(comparer.compare())
        }
        .await;
        ctx.register_closer(move || comparer.close());

        let res = compared?;
        self.record_differences(namespace, shard.id(), &res);

        tracing::debug!(
            "Compared namespace {} shard {} block {} across {} replicas: {} series, {} blocks, {} size diffs, {} checksum diffs",
            namespace,
            shard.id(),
            t,
            replicas.len(),
            res.num_series,
            res.num_blocks,
            res.size_differences.num_blocks(),
            res.checksum_differences.num_blocks()
        );

        Ok(res)
    }

    /// Feeds every page of the shard's local metadata into the comparer.
    async fn add_local_metadata(
        &self,
        ctx: &Context,
        comparer: &mut dyn MetadataComparer,
        origin: &HostId,
        shard: &dyn Shard,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let mut page_token = None;
        loop {
            ctx.check_cancelled()?;

            // A fresh context per fetch: metadata fetches register many
            // dependencies, which must not accumulate on the caller's context.
            let fetch_ctx = Context::new();
            let fetched = shard
                .fetch_blocks_metadata(
                    &fetch_ctx,
                    start,
                    end,
                    LOCAL_FETCH_LIMIT,
                    page_token,
                    FetchBlocksMetadataOptions::default(),
                )
                .await;
            fetch_ctx.close();

            let local = fetched.map_err(|e| fetch_error("local metadata", e))?;
            page_token = local.next_page_token;
            comparer.add_local_metadata(origin, FilteredBlocksMetadataIter::new(local));

            if page_token.is_none() {
                return Ok(());
            }
        }
    }

    /// Tags the result by namespace and shard and adds it to the
    /// `total`, `sizeDiff` and `checksumDiff` counters.
    pub fn record_differences(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        res: &MetadataComparisonResult,
    ) {
        let shard = shard.to_string();
        let shard_scope = self
            .scope
            .tagged(&[("namespace", namespace.as_str()), ("shard", &shard)]);
        let total_scope = shard_scope.tagged(&[("resultType", "total")]);
        let size_diff_scope = shard_scope.tagged(&[("resultType", "sizeDiff")]);
        let checksum_diff_scope = shard_scope.tagged(&[("resultType", "checksumDiff")]);

        total_scope.counter("series").add(res.num_series);
        total_scope.counter("blocks").add(res.num_blocks);

        size_diff_scope
            .counter("series")
            .add(res.size_differences.num_series());
        size_diff_scope
            .counter("blocks")
            .add(res.size_differences.num_blocks());

        checksum_diff_scope
            .counter("series")
            .add(res.checksum_differences.num_series());
        checksum_diff_scope
            .counter("blocks")
            .add(res.checksum_differences.num_blocks());
    }
}

#[async_trait]
impl ShardRepairer for DefaultShardRepairer {
    fn options(&self) -> &RepairOptions {
        &self.options
    }

    async fn repair(
        &self,
        ctx: &Context,
        namespace: &NamespaceId,
        t: DateTime<Utc>,
        shard: &dyn Shard,
    ) -> Result<MetadataComparisonResult> {
        let span = tracing::info_span!(
            tracepoint::SHARD_REPAIR,
            namespace = %namespace,
            shard = shard.id()
        );
        self.repair_shard(ctx, namespace, t, shard)
            .instrument(span)
            .await
    }
}

fn fetch_error(what: &str, err: Error) -> Error {
    match err {
        Error::Fetch(_) | Error::Cancelled => err,
        other => Error::Fetch(format!("{}: {}", what, other)),
    }
}
