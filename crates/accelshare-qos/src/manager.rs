//! QoS manager: admission, priority dequeue, guarantees, SLO compliance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use accelshare_metrics::{LabelSet, MetricsSink};

use crate::error::{QosError, QosResult};
use crate::queue::{QosLevel, Request, RequestQueue};
use crate::slo::{ModelStats, Slo, SloMetrics};

/// QoS manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosConfig {
    /// Reject enqueues once this many requests are pending overall.
    pub saturation_cap: usize,
    /// Sliding window for throughput computation, milliseconds.
    pub throughput_window_ms: u64,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            saturation_cap: 100,
            throughput_window_ms: 60_000,
        }
    }
}

/// Result of an SLO compliance check. `metrics` is absent when the model has
/// no registered SLO or no completions yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloCompliance {
    pub compliant: bool,
    pub metrics: Option<SloMetrics>,
}

/// Owns the request queues and per-model statistics.
pub struct QosManager {
    config: QosConfig,
    queue: RequestQueue,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<ManagerState>,
}

struct ManagerState {
    slos: HashMap<String, Slo>,
    stats: HashMap<String, ModelStats>,
    guarantees: HashMap<String, f64>,
    limits: HashMap<String, f64>,
    throttle_low: bool,
}

impl QosManager {
    pub fn new(config: QosConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            queue: RequestQueue::new(),
            metrics,
            state: Mutex::new(ManagerState {
                slos: HashMap::new(),
                stats: HashMap::new(),
                guarantees: HashMap::new(),
                limits: HashMap::new(),
                throttle_low: false,
            }),
        }
    }

    /// Registers (or replaces) the SLO for a model.
    pub fn register_slo(&self, slo: Slo) {
        info!(
            model_id = %slo.model_id,
            max_latency_ms = slo.max_latency_ms,
            min_throughput = slo.min_throughput_per_sec,
            "registered SLO"
        );
        let mut state = self.state.lock().unwrap();
        let window = self.config.throughput_window_ms;
        state
            .stats
            .entry(slo.model_id.clone())
            .or_insert_with(|| ModelStats::new(window));
        state.slos.insert(slo.model_id.clone(), slo);
    }

    /// Admits a request into its priority band.
    pub fn enqueue(&self, request: Request) -> QosResult<()> {
        let depth = self.queue.len(None);
        if depth >= self.config.saturation_cap {
            warn!(
                request_id = %request.request_id,
                depth,
                "queue saturated, rejecting"
            );
            return Err(QosError::Saturated {
                depth,
                cap: self.config.saturation_cap,
            });
        }

        if request.priority == QosLevel::Low
            && self.state.lock().unwrap().throttle_low
            && self.queue.len(Some(QosLevel::High)) > 0
        {
            return Err(QosError::Throttled);
        }

        debug!(request_id = %request.request_id, priority = %request.priority, "enqueued");
        let priority = request.priority;
        self.queue.enqueue(request);
        self.update_depth_gauge(priority);
        Ok(())
    }

    /// Next request to process, after draining expired entries.
    pub fn dequeue(&self, now_ms: u64) -> Option<Request> {
        let request = self.queue.dequeue(now_ms);
        if let Some(request) = &request {
            self.update_depth_gauge(request.priority);
        }
        request
    }

    /// Records a completion for SLO tracking.
    pub fn record_completion(&self, model_id: &str, latency_ms: f64, ok: bool, now_ms: u64) {
        let mut state = self.state.lock().unwrap();
        let window = self.config.throughput_window_ms;
        state
            .stats
            .entry(model_id.to_string())
            .or_insert_with(|| ModelStats::new(window))
            .record(latency_ms, ok, now_ms);
        drop(state);

        self.metrics
            .histogram(
                "model_request_latency_seconds",
                &LabelSet::new(&[("model", model_id)]),
            )
            .observe(latency_ms / 1_000.0);
    }

    /// Checks the model against its registered SLO. A model without an SLO
    /// or without completions is compliant by definition.
    pub fn slo_compliance(&self, model_id: &str, now_ms: u64) -> SloCompliance {
        let mut state = self.state.lock().unwrap();
        let Some(slo) = state.slos.get(model_id).cloned() else {
            return SloCompliance {
                compliant: true,
                metrics: None,
            };
        };
        let Some(stats) = state.stats.get_mut(model_id) else {
            return SloCompliance {
                compliant: true,
                metrics: None,
            };
        };
        if stats.completed_requests == 0 {
            return SloCompliance {
                compliant: true,
                metrics: None,
            };
        }

        let avg_latency_ms = stats.avg_latency_ms();
        let throughput = stats.throughput_per_sec(now_ms);
        let latency_compliant = avg_latency_ms <= slo.max_latency_ms;
        let throughput_compliant = throughput >= slo.min_throughput_per_sec;
        let compliant = latency_compliant && throughput_compliant;

        if !compliant {
            warn!(
                model_id,
                avg_latency_ms, throughput, "SLO violation detected"
            );
        }

        SloCompliance {
            compliant,
            metrics: Some(SloMetrics {
                avg_latency_ms,
                max_latency_ms: stats.max_latency_ms,
                min_latency_ms: stats.min_latency_ms,
                throughput_per_sec: throughput,
                total_requests: stats.total_requests,
                completed_requests: stats.completed_requests,
                failed_requests: stats.failed_requests,
                latency_compliant,
                throughput_compliant,
            }),
        }
    }

    /// Sets the minimum resource guarantee for a model, in [0, 1].
    pub fn set_resource_guarantee(&self, model_id: &str, guarantee: f64) -> QosResult<()> {
        if !(0.0..=1.0).contains(&guarantee) {
            return Err(QosError::InvalidFraction { value: guarantee });
        }
        self.state
            .lock()
            .unwrap()
            .guarantees
            .insert(model_id.to_string(), guarantee);
        Ok(())
    }

    /// Sets the maximum resource limit for a model, in [0, 1].
    pub fn set_resource_limit(&self, model_id: &str, limit: f64) -> QosResult<()> {
        if !(0.0..=1.0).contains(&limit) {
            return Err(QosError::InvalidFraction { value: limit });
        }
        self.state
            .lock()
            .unwrap()
            .limits
            .insert(model_id.to_string(), limit);
        Ok(())
    }

    pub fn resource_guarantee(&self, model_id: &str) -> Option<f64> {
        self.state.lock().unwrap().guarantees.get(model_id).copied()
    }

    pub fn resource_limit(&self, model_id: &str) -> Option<f64> {
        self.state.lock().unwrap().limits.get(model_id).copied()
    }

    /// When enabled, low-priority enqueues are rejected while high-priority
    /// requests wait.
    pub fn throttle_low_priority(&self, enable: bool) {
        info!(enable, "low-priority throttling switched");
        self.state.lock().unwrap().throttle_low = enable;
    }

    pub fn queue_depth(&self, level: Option<QosLevel>) -> usize {
        self.queue.len(level)
    }

    fn update_depth_gauge(&self, level: QosLevel) {
        self.metrics
            .gauge(
                "queue_depth",
                &LabelSet::new(&[("priority", level.as_str())]),
            )
            .set(self.queue.len(Some(level)) as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelshare_metrics::InMemorySink;

    fn manager() -> QosManager {
        QosManager::new(QosConfig::default(), Arc::new(InMemorySink::new()))
    }

    #[test]
    fn test_priority_dequeue_order() {
        let m = manager();
        m.enqueue(Request::new("r1", "m", 0, QosLevel::Low)).unwrap();
        m.enqueue(Request::new("r2", "m", 0, QosLevel::Low)).unwrap();
        m.enqueue(Request::new("r3", "m", 0, QosLevel::High)).unwrap();
        m.enqueue(Request::new("r4", "m", 0, QosLevel::Medium)).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| m.dequeue(0))
            .map(|r| r.request_id)
            .collect();
        assert_eq!(order, vec!["r3", "r4", "r1", "r2"]);
    }

    #[test]
    fn test_saturation_cap() {
        let m = QosManager::new(
            QosConfig {
                saturation_cap: 2,
                ..QosConfig::default()
            },
            Arc::new(InMemorySink::new()),
        );
        m.enqueue(Request::new("r1", "m", 0, QosLevel::Low)).unwrap();
        m.enqueue(Request::new("r2", "m", 0, QosLevel::Low)).unwrap();
        assert!(matches!(
            m.enqueue(Request::new("r3", "m", 0, QosLevel::High)),
            Err(QosError::Saturated { depth: 2, cap: 2 })
        ));
    }

    #[test]
    fn test_throttle_low_priority() {
        let m = manager();
        m.throttle_low_priority(true);
        m.enqueue(Request::new("hi", "m", 0, QosLevel::High)).unwrap();
        assert!(matches!(
            m.enqueue(Request::new("lo", "m", 0, QosLevel::Low)),
            Err(QosError::Throttled)
        ));
        // Drain the high band; low requests flow again.
        m.dequeue(0);
        m.enqueue(Request::new("lo2", "m", 0, QosLevel::Low)).unwrap();
    }

    #[test]
    fn test_slo_compliance_flags_latency() {
        let m = manager();
        m.register_slo(Slo::new("model-a", 100.0, 0.0));
        m.record_completion("model-a", 250.0, true, 1_000);

        let report = m.slo_compliance("model-a", 1_000);
        assert!(!report.compliant);
        let metrics = report.metrics.unwrap();
        assert!(!metrics.latency_compliant);
        assert!(metrics.throughput_compliant);
    }

    #[test]
    fn test_slo_compliance_without_slo() {
        let m = manager();
        m.record_completion("model-b", 10.0, true, 1_000);
        let report = m.slo_compliance("model-b", 1_000);
        assert!(report.compliant);
        assert!(report.metrics.is_none());
    }

    #[test]
    fn test_failed_completions_counted() {
        let m = manager();
        m.register_slo(Slo::new("model-c", 1_000.0, 0.0));
        m.record_completion("model-c", 50.0, true, 1_000);
        m.record_completion("model-c", 0.0, false, 2_000);

        let report = m.slo_compliance("model-c", 2_000);
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.completed_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
    }

    #[test]
    fn test_resource_fraction_bounds() {
        let m = manager();
        assert!(m.set_resource_guarantee("m", 0.5).is_ok());
        assert!(m.set_resource_limit("m", 1.0).is_ok());
        assert!(matches!(
            m.set_resource_guarantee("m", 1.5),
            Err(QosError::InvalidFraction { .. })
        ));
        assert!(matches!(
            m.set_resource_limit("m", -0.1),
            Err(QosError::InvalidFraction { .. })
        ));
        assert_eq!(m.resource_guarantee("m"), Some(0.5));
        assert_eq!(m.resource_limit("m"), Some(1.0));
    }

    #[test]
    fn test_expired_requests_skipped() {
        let m = manager();
        let mut stale = Request::new("stale", "m", 0, QosLevel::High);
        stale.deadline_ms = Some(10);
        m.enqueue(stale).unwrap();
        m.enqueue(Request::new("fresh", "m", 0, QosLevel::Medium))
            .unwrap();
        assert_eq!(m.dequeue(100).unwrap().request_id, "fresh");
    }
}
