//! Shared fixtures for integration scenarios.

use std::sync::Arc;

use accelshare_guard::config::{build_gateway, GuardConfig, NullBackendProvider};
use accelshare_guard::{SafetyGateway, TrafficConfig, TrafficLimiter};
use accelshare_metrics::InMemorySink;
use accelshare_partition::{
    ComputeMode, DeviceCatalog, MemoryMode, NullDeviceController, Partitioner, PartitionerConfig,
};
use accelshare_qos::{QosConfig, QosManager};
use accelshare_scheduler::ModelScheduler;

/// Control-plane fixture: catalog, initialized partitioner, scheduler.
pub struct ControlPlane {
    pub catalog: Arc<DeviceCatalog>,
    pub partitioner: Arc<Partitioner>,
    pub scheduler: Arc<ModelScheduler>,
    pub metrics: Arc<InMemorySink>,
}

impl ControlPlane {
    /// Fixture over an MI300X with the given modes.
    pub fn mi300x(compute: ComputeMode, memory: MemoryMode) -> Self {
        let metrics = Arc::new(InMemorySink::new());
        let catalog = Arc::new(DeviceCatalog::builtin());
        let partitioner = Arc::new(Partitioner::new(
            catalog.clone(),
            Arc::new(NullDeviceController::new(8)),
            metrics.clone(),
            PartitionerConfig::default(),
        ));
        partitioner
            .initialize("MI300X", compute, memory)
            .expect("fixture device initializes");
        let scheduler = Arc::new(ModelScheduler::new(catalog.clone(), partitioner.clone()));
        Self {
            catalog,
            partitioner,
            scheduler,
            metrics,
        }
    }
}

/// Data-plane fixture: gateway, traffic limiter, QoS manager.
pub struct DataPlane {
    pub gateway: SafetyGateway,
    pub limiter: TrafficLimiter,
    pub qos: QosManager,
    pub metrics: Arc<InMemorySink>,
}

impl DataPlane {
    /// Fixture with default configuration and rule-backed classifiers.
    pub fn with_defaults() -> Self {
        Self::with_config(GuardConfig::default(), QosConfig::default())
    }

    /// Fixture with explicit configuration.
    pub fn with_config(guard: GuardConfig, qos: QosConfig) -> Self {
        let metrics = Arc::new(InMemorySink::new());
        let gateway = build_gateway(&guard, &NullBackendProvider, metrics.clone());
        let limiter = TrafficLimiter::new(guard.traffic.clone());
        let qos = QosManager::new(qos, metrics.clone());
        Self {
            gateway,
            limiter,
            qos,
            metrics,
        }
    }
}

/// Counter lookup helper for metric assertions.
pub fn counter_value(sink: &InMemorySink, name: &str, label: (&str, &str)) -> u64 {
    sink.counter_series()
        .into_iter()
        .find(|(n, labels, _)| {
            n == name
                && labels
                    .pairs()
                    .contains(&(label.0.to_string(), label.1.to_string()))
        })
        .map(|(_, _, v)| v)
        .unwrap_or(0)
}
