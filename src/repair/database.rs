//! Database repairer: the background repair scheduler
//!
//! A single loop polls every `repair_check_interval` and starts at most one
//! pass per `repair_interval`, no earlier than `repair_time_offset` plus a
//! per-process random jitter after the interval starts. A pass walks every
//! block start in the retention window, most recent first, skipping blocks
//! that already succeeded or ran out of retries, and asks each owned
//! namespace to compare its shards with their peers.
//!
//! `stop` only prevents the loop from starting another iteration; a pass in
//! flight runs to completion. Callers that need a quiescent node wait for
//! `is_repairing` to turn false after stopping.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::common::metrics::{Counter, Gauge, Histogram, BACKGROUND_BUCKETS};
use crate::common::{
    sub_duration, tracepoint, truncate, Error, MultiError, NowFn, RepairOptions, Result,
    RetentionOptions,
};
use crate::repair::ledger::{RepairLedger, RepairState};
use crate::repair::options::Options;
use crate::repair::schedule::IntervalSchedule;
use crate::repair::shard::{DefaultShardRepairer, ShardRepairer};
use crate::storage::Database;

pub struct DatabaseRepairer {
    inner: Arc<Inner>,
}

struct Inner {
    database: Arc<dyn Database>,
    shard_repairer: Arc<dyn ShardRepairer>,
    retention: RetentionOptions,
    now_fn: NowFn,

    repair_interval: Duration,
    repair_time_offset: Duration,
    repair_time_jitter: Duration,
    repair_check_interval: Duration,
    repair_max_retries: u32,

    state: Mutex<LoopState>,
    running: AtomicBool,
    metrics: RepairerMetrics,
}

#[derive(Default)]
struct LoopState {
    closed: bool,
    ledger: RepairLedger,
}

struct RepairerMetrics {
    pass_success: Arc<Counter>,
    pass_errors: Arc<Counter>,
    pass_rejected: Arc<Counter>,
    block_success: Arc<Counter>,
    block_errors: Arc<Counter>,
    ledger_size: Arc<Gauge>,
    pass_latency: Arc<Histogram>,
}

/// Holds the running flag; clears it on drop.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DatabaseRepairer {
    /// Build a repairer comparing shards through `opts.admin_client`.
    pub fn new(database: Arc<dyn Database>, opts: Options) -> Result<Self> {
        let repair = validated_repair_options(&opts)?;
        let client = opts
            .admin_client
            .clone()
            .ok_or_else(|| Error::InvalidConfig("no admin client".into()))?;
        let shard_repairer = Arc::new(DefaultShardRepairer::new(
            repair,
            &opts.retention,
            client,
            &opts.scope,
            &opts.host_id,
        ));
        Self::with_shard_repairer(database, opts, shard_repairer)
    }

    /// Build a repairer around a caller-supplied shard repairer.
    pub fn with_shard_repairer(
        database: Arc<dyn Database>,
        opts: Options,
        shard_repairer: Arc<dyn ShardRepairer>,
    ) -> Result<Self> {
        let repair = validated_repair_options(&opts)?;
        let jitter = draw_jitter(repair.repair_time_jitter, (opts.now_fn)());

        let scope = opts
            .scope
            .sub_scope("database.repair")
            .tagged(&[("host", opts.host_id.as_str())]);
        let metrics = RepairerMetrics {
            pass_success: scope.tagged(&[("result", "success")]).counter("pass"),
            pass_errors: scope.tagged(&[("result", "error")]).counter("pass"),
            pass_rejected: scope.tagged(&[("result", "in-progress")]).counter("pass"),
            block_success: scope.tagged(&[("result", "success")]).counter("block"),
            block_errors: scope.tagged(&[("result", "error")]).counter("block"),
            ledger_size: scope.gauge("ledger.size"),
            pass_latency: scope.histogram("pass.latency", &BACKGROUND_BUCKETS),
        };

        let inner = Inner {
            database,
            shard_repairer,
            retention: opts.retention,
            now_fn: opts.now_fn,
            repair_interval: repair.repair_interval,
            repair_time_offset: repair.repair_time_offset,
            repair_time_jitter: jitter,
            repair_check_interval: repair.repair_check_interval,
            repair_max_retries: repair.repair_max_retries,
            state: Mutex::new(LoopState::default()),
            running: AtomicBool::new(false),
            metrics,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Spawn the background loop. Returns `None`, spawning nothing, when the
    /// repair interval is zero.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.repair_interval.is_zero() {
            tracing::info!("Repair disabled: repair_interval is zero");
            return None;
        }
        tracing::info!(
            "Starting repair loop: interval {:?}, offset {:?}, jitter {:?}",
            self.inner.repair_interval,
            self.inner.repair_time_offset,
            self.inner.repair_time_jitter
        );
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(inner.run()))
    }

    /// Stop the loop before its next iteration; an in-flight pass is not interrupted.
    pub fn stop(&self) {
        self.inner.lock_state().closed = true;
    }

    /// Run one pass now. Fails fast with `Error::RepairInProgress` if a pass is running.
    pub async fn repair(&self) -> Result<()> {
        self.inner.repair().await
    }

    pub fn is_repairing(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The random delay drawn for this process.
    pub fn jitter(&self) -> Duration {
        self.inner.repair_time_jitter
    }

    /// Block starts the next pass would repair, most recent first.
    pub fn repair_times(&self) -> Vec<DateTime<Utc>> {
        let now = (self.inner.now_fn)();
        let state = self.inner.lock_state();
        self.inner.repair_times(now, &state.ledger)
    }

    pub fn repair_state(&self, t: DateTime<Utc>) -> RepairState {
        self.inner.lock_state().ledger.get(t)
    }

    pub fn ledger_len(&self) -> usize {
        self.inner.lock_state().ledger.len()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    async fn run(self: Arc<Self>) {
        let mut schedule = IntervalSchedule::new(
            self.repair_interval,
            self.repair_time_offset + self.repair_time_jitter,
        );

        loop {
            if self.is_closed() {
                break;
            }

            tokio::time::sleep(self.repair_check_interval).await;

            let now = (self.now_fn)();
            if !schedule.should_run(now) {
                continue;
            }

            if let Err(e) = self.repair().await {
                tracing::error!("error repairing database: {}", e);
            }
        }

        tracing::info!("Repair loop stopped");
    }

    async fn repair(&self) -> Result<()> {
        // Repairing incomplete local data would only report false differences
        if !self.database.is_bootstrapped() {
            tracing::debug!("Skipping repair: database not bootstrapped");
            return Ok(());
        }

        let _running = match RunningGuard::acquire(&self.running) {
            Some(guard) => guard,
            None => {
                self.metrics.pass_rejected.inc();
                return Err(Error::RepairInProgress);
            }
        };

        let started = Instant::now();
        let res = self
            .repair_pass()
            .instrument(tracing::info_span!(tracepoint::DB_REPAIR))
            .await;
        self.metrics
            .pass_latency
            .observe(started.elapsed().as_secs_f64());

        match &res {
            Ok(()) => self.metrics.pass_success.inc(),
            Err(_) => self.metrics.pass_errors.inc(),
        }
        res
    }

    async fn repair_pass(&self) -> Result<()> {
        let now = (self.now_fn)();
        let repair_times = {
            let mut state = self.lock_state();
            let times = self.repair_times(now, &state.ledger);
            let (retention_start, _) = self.retention_bounds(now);
            let pruned = state.ledger.prune_before(retention_start);
            if pruned > 0 {
                tracing::debug!("Pruned {} repair states before {}", pruned, retention_start);
            }
            times
        };

        tracing::info!("Repairing {} blocks", repair_times.len());

        let mut multi_err = MultiError::new();
        for t in repair_times {
            let res = self
                .repair_with_time(t)
                .instrument(tracing::info_span!(tracepoint::DB_REPAIR_WITH_TIME, time = %t))
                .await;

            let ledger_len = {
                let mut state = self.lock_state();
                match res {
                    Ok(()) => {
                        state.ledger.record_success(t);
                        self.metrics.block_success.inc();
                    }
                    Err(e) => {
                        state.ledger.record_failure(t);
                        self.metrics.block_errors.inc();
                        tracing::warn!(
                            "Repair of block {} failed (attempt {}): {}",
                            t,
                            state.ledger.get(t).num_failures,
                            e
                        );
                        multi_err.add(e);
                    }
                }
                state.ledger.len()
            };
            self.metrics.ledger_size.set(ledger_len as u64);
        }

        multi_err.final_error()
    }

    async fn repair_with_time(&self, t: DateTime<Utc>) -> Result<()> {
        let mut multi_err = MultiError::new();
        for namespace in self.database.owned_namespaces() {
            if let Err(e) = namespace
                .repair(Arc::clone(&self.shard_repairer), t)
                .await
            {
                multi_err.add(Error::NamespaceRepair {
                    namespace: namespace.id().clone(),
                    time: t,
                    source: Box::new(e),
                });
            }
        }
        multi_err.final_error()
    }

    /// First and last block starts eligible for repair.
    fn retention_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let block_size = self.retention.block_size;
        let start = truncate(sub_duration(now, self.retention.retention_period), block_size);
        // the newest block may still take writes through the buffer
        let end = truncate(
            sub_duration(sub_duration(now, self.retention.buffer_past), block_size),
            block_size,
        );
        (start, end)
    }

    fn repair_times(&self, now: DateTime<Utc>, ledger: &RepairLedger) -> Vec<DateTime<Utc>> {
        let block_size = self.retention.block_size;
        let (start, end) = self.retention_bounds(now);

        let mut times = Vec::new();
        let mut t = end;
        while t >= start {
            if ledger.needs_repair(t, self.repair_max_retries) {
                times.push(t);
            }
            let prev = sub_duration(t, block_size);
            if prev >= t {
                break;
            }
            t = prev;
        }
        times
    }
}

fn validated_repair_options(opts: &Options) -> Result<RepairOptions> {
    let repair = opts.repair.clone().ok_or(Error::NoRepairOptions)?;
    repair.validate()?;
    opts.retention.validate()?;
    Ok(repair)
}

/// `max * uniform(0, 1)`, seeded from the clock so nodes spread out.
fn draw_jitter(max: Duration, now: DateTime<Utc>) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let seed = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_millis());
    let mut rng = StdRng::seed_from_u64(seed as u64);
    max.mul_f64(rng.gen::<f64>())
}
