//! In-process metrics with tagged scopes
//!
//! Metrics are identified by a dotted name plus a set of tags. A [`Scope`]
//! carries a name prefix and tags and hands out counters, gauges and
//! histograms registered in a shared [`MetricsRegistry`], which can render
//! everything in the Prometheus text format.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Bucket boundaries (in seconds) for long-running background work
pub const BACKGROUND_BUCKETS: [f64; 8] = [1.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0, 14400.0];

/// A simple histogram implementation
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored in thousandths for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

pub type Tags = BTreeMap<String, String>;

/// Name plus tags; the registry key of one metric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetricId {
    pub name: String,
    pub tags: Tags,
}

impl MetricId {
    pub fn new(name: &str, tags: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn prometheus_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    fn prometheus_labels(&self, extra: Option<(&str, String)>) -> String {
        let mut labels: Vec<String> = self
            .tags
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
            .collect();
        if let Some((k, v)) = extra {
            labels.push(format!("{}=\"{}\"", k, v));
        }
        if labels.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", labels.join(","))
        }
    }
}

/// Registry of every metric created through its scopes
#[derive(Debug)]
pub struct MetricsRegistry {
    counters: Mutex<BTreeMap<MetricId, Arc<Counter>>>,
    gauges: Mutex<BTreeMap<MetricId, Arc<Gauge>>>,
    histograms: Mutex<BTreeMap<MetricId, Arc<Histogram>>>,

    /// Start time for uptime calculation
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
            gauges: Mutex::new(BTreeMap::new()),
            histograms: Mutex::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Root scope with no prefix and no tags
    pub fn root_scope(self: &Arc<Self>) -> Scope {
        Scope {
            registry: Arc::clone(self),
            prefix: String::new(),
            tags: Tags::new(),
        }
    }

    /// Get or create a counter
    pub fn counter(&self, id: MetricId) -> Arc<Counter> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.entry(id).or_default().clone()
    }

    /// Get or create a gauge
    pub fn gauge(&self, id: MetricId) -> Arc<Gauge> {
        let mut gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);
        gauges.entry(id).or_default().clone()
    }

    /// Get or create a histogram; `boundaries` only apply on creation
    pub fn histogram(&self, id: MetricId, boundaries: &[f64]) -> Arc<Histogram> {
        let mut histograms = self
            .histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        histograms
            .entry(id)
            .or_insert_with(|| Arc::new(Histogram::with_buckets(boundaries)))
            .clone()
    }

    /// Current value of a counter, zero if it was never created
    pub fn counter_value(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters
            .get(&MetricId::new(name, tags))
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Current value of a gauge, zero if it was never created
    pub fn gauge_value(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        let gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);
        gauges
            .get(&MetricId::new(name, tags))
            .map(|g| g.get())
            .unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        out.push_str("# TYPE tsdb_repair_uptime_seconds gauge\n");
        let _ = writeln!(out, "tsdb_repair_uptime_seconds {}", self.uptime_seconds());

        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, counter) in counters.iter() {
            let _ = writeln!(
                out,
                "{}{} {}",
                id.prometheus_name(),
                id.prometheus_labels(None),
                counter.get()
            );
        }
        drop(counters);

        let gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, gauge) in gauges.iter() {
            let _ = writeln!(
                out,
                "{}{} {}",
                id.prometheus_name(),
                id.prometheus_labels(None),
                gauge.get()
            );
        }
        drop(gauges);

        let histograms = self
            .histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (id, hist) in histograms.iter() {
            let name = id.prometheus_name();
            for (le, count) in hist.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "{}_bucket{} {}",
                    name,
                    id.prometheus_labels(Some(("le", le))),
                    count
                );
            }
            let _ = writeln!(out, "{}_sum{} {}", name, id.prometheus_labels(None), hist.sum());
            let _ = writeln!(
                out,
                "{}_count{} {}",
                name,
                id.prometheus_labels(None),
                hist.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A name prefix plus tags, handing out metrics from a shared registry.
#[derive(Debug, Clone)]
pub struct Scope {
    registry: Arc<MetricsRegistry>,
    prefix: String,
    tags: Tags,
}

impl Scope {
    /// Scope whose metric names are prefixed with `name`.
    pub fn sub_scope(&self, name: &str) -> Scope {
        let prefix = if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        };
        Scope {
            registry: Arc::clone(&self.registry),
            prefix,
            tags: self.tags.clone(),
        }
    }

    /// Scope carrying these tags on top of the current ones.
    pub fn tagged(&self, tags: &[(&str, &str)]) -> Scope {
        let mut merged = self.tags.clone();
        for (k, v) in tags {
            merged.insert(k.to_string(), v.to_string());
        }
        Scope {
            registry: Arc::clone(&self.registry),
            prefix: self.prefix.clone(),
            tags: merged,
        }
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.registry.counter(self.id(name))
    }

    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        self.registry.gauge(self.id(name))
    }

    pub fn histogram(&self, name: &str, boundaries: &[f64]) -> Arc<Histogram> {
        self.registry.histogram(self.id(name), boundaries)
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    fn id(&self, name: &str) -> MetricId {
        let name = if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        };
        MetricId {
            name,
            tags: self.tags.clone(),
        }
    }
}

/// A scope backed by a fresh registry, for callers that do not export metrics.
impl Default for Scope {
    fn default() -> Self {
        Arc::new(MetricsRegistry::new()).root_scope()
    }
}
