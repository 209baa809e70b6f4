//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use tsdb_repair::common::{Context, NowFn, RepairOptions, RetentionOptions};
use tsdb_repair::repair::metadata::{
    BlockMetadata, FetchBlocksMetadataOptions, FetchBlocksMetadataResult, HostId, PageToken,
    PeerBlockMetadata, PeerMetadataIter, SeriesBlocksMetadata,
};
use tsdb_repair::repair::{AdminClient, AdminSession, ShardRepairer};
use tsdb_repair::storage::{Database, Namespace, NamespaceId, Shard, ShardId};
use tsdb_repair::{Error, Result};

pub const HOUR: u64 = 3600;
pub const DAY: u64 = 86400;

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

pub fn retention() -> RetentionOptions {
    RetentionOptions {
        retention_period: Duration::from_secs(2 * DAY),
        block_size: Duration::from_secs(2 * HOUR),
        buffer_past: Duration::from_secs(10 * 60),
    }
}

pub fn repair_options(max_retries: u32) -> RepairOptions {
    RepairOptions {
        repair_interval: Duration::from_secs(DAY),
        repair_time_offset: Duration::from_secs(HOUR),
        repair_time_jitter: Duration::ZERO,
        repair_check_interval: Duration::from_secs(1),
        repair_max_retries: max_retries,
        repair_shard_concurrency: 1,
        repair_throttle: Duration::ZERO,
    }
}

/// A clock tests move by hand.
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(t: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(t)))
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += TimeDelta::from_std(d).unwrap();
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }

    pub fn now_fn(&self) -> NowFn {
        let clock = self.clone();
        Arc::new(move || clock.now())
    }
}

/// Wall clock driven by tokio's (pausable) timer, starting at `base`.
pub fn tokio_clock(base: DateTime<Utc>) -> NowFn {
    let start = tokio::time::Instant::now();
    Arc::new(move || base + TimeDelta::from_std(start.elapsed()).unwrap())
}

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub page_token: Option<PageToken>,
    pub ctx_addr: usize,
}

/// A local shard serving fixed pages of metadata.
pub struct FakeShard {
    id: ShardId,
    pages: Vec<Vec<SeriesBlocksMetadata>>,
    fail: bool,
    pub fetches: Mutex<Vec<FetchCall>>,
}

impl FakeShard {
    pub fn new(id: ShardId, blocks: Vec<(&str, BlockMetadata)>) -> Self {
        Self::paged(id, vec![blocks])
    }

    pub fn paged(id: ShardId, pages: Vec<Vec<(&str, BlockMetadata)>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|page| {
                page.into_iter()
                    .map(|(series, block)| SeriesBlocksMetadata {
                        id: series.to_string(),
                        blocks: vec![block.into()],
                    })
                    .collect()
            })
            .collect();
        Self {
            id,
            pages,
            fail: false,
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(id: ShardId) -> Self {
        Self {
            fail: true,
            ..Self::paged(id, vec![])
        }
    }
}

#[async_trait]
impl Shard for FakeShard {
    fn id(&self) -> ShardId {
        self.id
    }

    async fn fetch_blocks_metadata(
        &self,
        ctx: &Context,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _limit: usize,
        page_token: Option<PageToken>,
        _opts: FetchBlocksMetadataOptions,
    ) -> Result<FetchBlocksMetadataResult> {
        self.fetches.lock().unwrap().push(FetchCall {
            start,
            end,
            page_token,
            ctx_addr: ctx as *const Context as usize,
        });
        if self.fail {
            return Err(Error::Internal("disk read failed".into()));
        }
        let idx = page_token.unwrap_or(0) as usize;
        let series = self.pages.get(idx).cloned().unwrap_or_default();
        let next_page_token = if idx + 1 < self.pages.len() {
            Some(idx as u64 + 1)
        } else {
            None
        };
        Ok(FetchBlocksMetadataResult {
            series,
            next_page_token,
        })
    }
}

/// A session whose peers all hold the same fixed metadata.
pub struct FakeSession {
    origin: HostId,
    replicas: Vec<HostId>,
    peers: Vec<PeerBlockMetadata>,
    peer_error: Option<String>,
    pub peer_fetches: Mutex<Vec<(NamespaceId, ShardId, DateTime<Utc>, DateTime<Utc>)>>,
}

impl FakeSession {
    pub fn new(origin: &str, replicas: &[&str], peers: Vec<(&str, &str, BlockMetadata)>) -> Self {
        Self {
            origin: HostId::from(origin),
            replicas: replicas.iter().map(|r| HostId::from(*r)).collect(),
            peers: peers
                .into_iter()
                .map(|(host, series, block)| PeerBlockMetadata {
                    host: HostId::from(host),
                    id: series.to_string(),
                    block,
                })
                .collect(),
            peer_error: None,
            peer_fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_peer_error(mut self, msg: &str) -> Self {
        self.peer_error = Some(msg.to_string());
        self
    }
}

#[async_trait]
impl AdminSession for FakeSession {
    fn origin(&self) -> HostId {
        self.origin.clone()
    }

    fn replicas(&self) -> Vec<HostId> {
        self.replicas.clone()
    }

    async fn fetch_blocks_metadata_from_peers(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeerMetadataIter> {
        self.peer_fetches
            .lock()
            .unwrap()
            .push((namespace.clone(), shard, start, end));
        if let Some(msg) = &self.peer_error {
            return Err(Error::Fetch(msg.clone()));
        }
        Ok(Box::new(self.peers.clone().into_iter().map(Ok)))
    }
}

pub struct FakeClient {
    session: Option<Arc<FakeSession>>,
}

impl FakeClient {
    pub fn new(session: Arc<FakeSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn without_session() -> Self {
        Self { session: None }
    }
}

#[async_trait]
impl AdminClient for FakeClient {
    async fn default_admin_session(&self) -> Result<Arc<dyn AdminSession>> {
        match &self.session {
            Some(session) => Ok(session.clone() as Arc<dyn AdminSession>),
            None => Err(Error::SessionUnavailable("no session".into())),
        }
    }
}

/// Records the block starts it was asked to repair; optionally fails.
pub struct RecordingNamespace {
    id: NamespaceId,
    fail: bool,
    pub calls: Mutex<Vec<DateTime<Utc>>>,
}

impl RecordingNamespace {
    pub fn new(id: &str) -> Self {
        Self {
            id: NamespaceId::from(id),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(id)
        }
    }

    pub fn calls(&self) -> Vec<DateTime<Utc>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Namespace for RecordingNamespace {
    fn id(&self) -> &NamespaceId {
        &self.id
    }

    async fn repair(&self, _repairer: Arc<dyn ShardRepairer>, t: DateTime<Utc>) -> Result<()> {
        self.calls.lock().unwrap().push(t);
        if self.fail {
            return Err(Error::Fetch("peer unreachable".into()));
        }
        Ok(())
    }
}

/// Parks inside `repair` until released.
pub struct BlockingNamespace {
    id: NamespaceId,
    pub entered: Notify,
    pub release: Notify,
}

impl BlockingNamespace {
    pub fn new(id: &str) -> Self {
        Self {
            id: NamespaceId::from(id),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl Namespace for BlockingNamespace {
    fn id(&self) -> &NamespaceId {
        &self.id
    }

    async fn repair(&self, _repairer: Arc<dyn ShardRepairer>, _t: DateTime<Utc>) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

pub struct FakeDatabase {
    bootstrapped: AtomicBool,
    namespaces: Vec<Arc<dyn Namespace>>,
    clock: Option<NowFn>,
    /// Clock readings at each bootstrap check, i.e. at the start of each pass
    pub checks: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeDatabase {
    pub fn new(namespaces: Vec<Arc<dyn Namespace>>) -> Self {
        Self {
            bootstrapped: AtomicBool::new(true),
            namespaces,
            clock: None,
            checks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: NowFn) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn set_bootstrapped(&self, bootstrapped: bool) {
        self.bootstrapped.store(bootstrapped, Ordering::SeqCst);
    }

    pub fn checks(&self) -> Vec<DateTime<Utc>> {
        self.checks.lock().unwrap().clone()
    }
}

impl Database for FakeDatabase {
    fn is_bootstrapped(&self) -> bool {
        if let Some(clock) = &self.clock {
            self.checks.lock().unwrap().push(clock());
        }
        self.bootstrapped.load(Ordering::SeqCst)
    }

    fn owned_namespaces(&self) -> Vec<Arc<dyn Namespace>> {
        self.namespaces.clone()
    }
}
