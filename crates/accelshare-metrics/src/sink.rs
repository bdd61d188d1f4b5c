//! Metric handle types and the `MetricsSink` trait.
//!
//! Handles are cheap clones around shared atomics. A sink hands out the same
//! underlying handle for the same (name, labels) pair, so components can
//! re-request a metric on the hot path without duplicating series.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A sorted list of (label, value) pairs identifying one metric series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    /// Builds a label set from pairs; order of input does not matter.
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self(labels)
    }

    /// Empty label set.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Label pairs in sorted order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Monotonically increasing counter.
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Creates a detached counter (not registered with any sink).
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Increments by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments by `delta`.
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

/// Gauge storing an f64 as raw bits.
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    /// Creates a detached gauge.
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    /// Sets the gauge.
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }

    /// Adds `delta` (may be negative).
    pub fn add(&self, delta: f64) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

/// Default histogram bucket boundaries, in seconds.
const BUCKET_BOUNDARIES: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Fixed-bucket histogram. The last bucket is +Inf.
pub struct Histogram {
    buckets: Arc<Vec<AtomicU64>>,
    sum_bits: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    /// Creates a detached histogram with the default buckets.
    pub fn new() -> Self {
        let buckets = (0..=BUCKET_BOUNDARIES.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            buckets: Arc::new(buckets),
            sum_bits: Arc::new(AtomicU64::new(0f64.to_bits())),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records one observation.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });

        let idx = BUCKET_BOUNDARIES
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(BUCKET_BOUNDARIES.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Observation count.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observed values.
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    /// Count in bucket `idx` (the last index is the overflow bucket).
    pub fn bucket_count(&self, idx: usize) -> u64 {
        self.buckets
            .get(idx)
            .map(|b| b.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Histogram {
    fn clone(&self) -> Self {
        Self {
            buckets: Arc::clone(&self.buckets),
            sum_bits: Arc::clone(&self.sum_bits),
            count: Arc::clone(&self.count),
        }
    }
}

/// Sink handing out metric handles. Implementations push or expose the
/// registered series to an external collector; the core only writes.
///
/// Must be safe under concurrent mutation from every subsystem.
pub trait MetricsSink: Send + Sync {
    /// Counter handle for (name, labels).
    fn counter(&self, name: &str, labels: &LabelSet) -> Counter;
    /// Gauge handle for (name, labels).
    fn gauge(&self, name: &str, labels: &LabelSet) -> Gauge;
    /// Histogram handle for (name, labels).
    fn histogram(&self, name: &str, labels: &LabelSet) -> Histogram;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    labels: LabelSet,
}

/// In-memory sink. Series live for the lifetime of the sink; an exporter
/// walks the registry to publish them.
pub struct InMemorySink {
    counters: DashMap<SeriesKey, Counter>,
    gauges: DashMap<SeriesKey, Gauge>,
    histograms: DashMap<SeriesKey, Histogram>,
}

impl InMemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
        }
    }

    /// Snapshot of all counter series as (name, labels, value).
    pub fn counter_series(&self) -> Vec<(String, LabelSet, u64)> {
        self.counters
            .iter()
            .map(|e| (e.key().name.clone(), e.key().labels.clone(), e.value().get()))
            .collect()
    }

    /// Snapshot of all gauge series as (name, labels, value).
    pub fn gauge_series(&self) -> Vec<(String, LabelSet, f64)> {
        self.gauges
            .iter()
            .map(|e| (e.key().name.clone(), e.key().labels.clone(), e.value().get()))
            .collect()
    }

    /// Snapshot of all histogram series as (name, labels, count, sum).
    pub fn histogram_series(&self) -> Vec<(String, LabelSet, u64, f64)> {
        self.histograms
            .iter()
            .map(|e| {
                (
                    e.key().name.clone(),
                    e.key().labels.clone(),
                    e.value().count(),
                    e.value().sum(),
                )
            })
            .collect()
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for InMemorySink {
    fn counter(&self, name: &str, labels: &LabelSet) -> Counter {
        let key = SeriesKey {
            name: name.to_string(),
            labels: labels.clone(),
        };
        self.counters.entry(key).or_default().clone()
    }

    fn gauge(&self, name: &str, labels: &LabelSet) -> Gauge {
        let key = SeriesKey {
            name: name.to_string(),
            labels: labels.clone(),
        };
        self.gauges.entry(key).or_default().clone()
    }

    fn histogram(&self, name: &str, labels: &LabelSet) -> Histogram {
        let key = SeriesKey {
            name: name.to_string(),
            labels: labels.clone(),
        };
        self.histograms.entry(key).or_default().clone()
    }
}

/// Sink that keeps nothing registered; every call returns a fresh detached
/// handle. Useful when a component is constructed without observability.
pub struct NullSink;

impl MetricsSink for NullSink {
    fn counter(&self, _name: &str, _labels: &LabelSet) -> Counter {
        Counter::new()
    }

    fn gauge(&self, _name: &str, _labels: &LabelSet) -> Gauge {
        Gauge::new()
    }

    fn histogram(&self, _name: &str, _labels: &LabelSet) -> Histogram {
        Histogram::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_inc_and_add() {
        let c = Counter::new();
        c.inc();
        c.add(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_gauge_set_and_add() {
        let g = Gauge::new();
        g.set(2.5);
        g.add(-1.0);
        assert!((g.get() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_observe() {
        let h = Histogram::new();
        h.observe(0.003);
        h.observe(0.003);
        h.observe(10.0);
        assert_eq!(h.count(), 3);
        assert!((h.sum() - 10.006).abs() < 1e-9);
        assert_eq!(h.bucket_count(1), 2);
        assert_eq!(h.bucket_count(BUCKET_BOUNDARIES.len()), 1);
    }

    #[test]
    fn test_sink_returns_same_series() {
        let sink = InMemorySink::new();
        let labels = LabelSet::new(&[("kind", "pii"), ("direction", "request")]);
        let a = sink.counter("guardrail_requests_total", &labels);
        let b = sink.counter("guardrail_requests_total", &labels);
        a.inc();
        b.inc();
        assert_eq!(a.get(), 2);
        assert_eq!(sink.counter_series().len(), 1);
    }

    #[test]
    fn test_label_order_is_normalized() {
        let a = LabelSet::new(&[("b", "2"), ("a", "1")]);
        let b = LabelSet::new(&[("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_handles_across_clones() {
        let sink = InMemorySink::new();
        let g = sink.gauge("queue_depth", &LabelSet::new(&[("priority", "high")]));
        let g2 = g.clone();
        g2.set(7.0);
        assert!((g.get() - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_null_sink_detached() {
        let sink = NullSink;
        let a = sink.counter("x", &LabelSet::empty());
        let b = sink.counter("x", &LabelSet::empty());
        a.inc();
        assert_eq!(b.get(), 0);
    }
}
