//! Per-model SLO definitions and completion tallies.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Service-level objective for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slo {
    pub model_id: String,
    /// Maximum acceptable average latency, milliseconds.
    pub max_latency_ms: f64,
    /// Minimum required throughput, completions per second.
    pub min_throughput_per_sec: f64,
    /// Target utilization in [0, 1].
    pub target_utilization: f64,
}

impl Slo {
    pub fn new(model_id: &str, max_latency_ms: f64, min_throughput_per_sec: f64) -> Self {
        Self {
            model_id: model_id.to_string(),
            max_latency_ms,
            min_throughput_per_sec,
            target_utilization: 0.8,
        }
    }
}

/// Metrics computed for an SLO compliance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloMetrics {
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub min_latency_ms: f64,
    pub throughput_per_sec: f64,
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub latency_compliant: bool,
    pub throughput_compliant: bool,
}

/// Running completion tally for one model. Completion timestamps are kept in
/// a ring bounded by the throughput window so the rate reflects observed
/// elapsed time rather than a fixed divisor.
#[derive(Debug)]
pub struct ModelStats {
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub total_latency_ms: f64,
    pub max_latency_ms: f64,
    pub min_latency_ms: f64,
    completions: VecDeque<u64>,
    window_ms: u64,
}

impl ModelStats {
    pub fn new(window_ms: u64) -> Self {
        Self {
            total_requests: 0,
            completed_requests: 0,
            failed_requests: 0,
            total_latency_ms: 0.0,
            max_latency_ms: 0.0,
            min_latency_ms: f64::INFINITY,
            completions: VecDeque::new(),
            window_ms,
        }
    }

    pub fn record(&mut self, latency_ms: f64, ok: bool, now_ms: u64) {
        self.total_requests += 1;
        if ok {
            self.completed_requests += 1;
            self.total_latency_ms += latency_ms;
            self.max_latency_ms = self.max_latency_ms.max(latency_ms);
            self.min_latency_ms = self.min_latency_ms.min(latency_ms);
            self.completions.push_back(now_ms);
        } else {
            self.failed_requests += 1;
        }
        self.purge(now_ms);
    }

    fn purge(&mut self, now_ms: u64) {
        let horizon = now_ms.saturating_sub(self.window_ms);
        while let Some(front) = self.completions.front() {
            if *front < horizon {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.completed_requests == 0 {
            0.0
        } else {
            self.total_latency_ms / self.completed_requests as f64
        }
    }

    /// Completions per second over the sliding window ending at `now_ms`.
    pub fn throughput_per_sec(&mut self, now_ms: u64) -> f64 {
        self.purge(now_ms);
        let Some(oldest) = self.completions.front().copied() else {
            return 0.0;
        };
        // Use the observed span inside the window, with a floor so a single
        // burst does not divide by near-zero.
        let span_ms = now_ms.saturating_sub(oldest).max(1_000);
        self.completions.len() as f64 / (span_ms as f64 / 1_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tracks_min_max() {
        let mut stats = ModelStats::new(60_000);
        stats.record(10.0, true, 1_000);
        stats.record(30.0, true, 2_000);
        stats.record(5.0, false, 3_000);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.completed_requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.max_latency_ms, 30.0);
        assert_eq!(stats.min_latency_ms, 10.0);
        assert!((stats.avg_latency_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_uses_observed_span() {
        let mut stats = ModelStats::new(60_000);
        for i in 0..10 {
            stats.record(1.0, true, i * 1_000);
        }
        // 10 completions over 9 seconds of span.
        let rate = stats.throughput_per_sec(9_000);
        assert!((rate - 10.0 / 9.0).abs() < 0.01);
    }

    #[test]
    fn test_throughput_window_purges_old() {
        let mut stats = ModelStats::new(60_000);
        stats.record(1.0, true, 0);
        stats.record(1.0, true, 120_000);
        let rate = stats.throughput_per_sec(120_000);
        // Only the second completion is inside the window; floor span 1s.
        assert!((rate - 1.0).abs() < 1e-9);
    }
}
