//! Integration tests for the workload controller against a mock source.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use accelshare_metrics::InMemorySink;
use accelshare_partition::{
    ComputeMode, DeviceCatalog, MemoryMode, NullDeviceController, Partitioner, PartitionerConfig,
    Precision,
};
use accelshare_scheduler::{
    ControllerConfig, ModelScheduler, SchedulerError, SchedulerResult, WorkloadController,
    WorkloadDeclaration, WorkloadEvent, WorkloadEventType, WorkloadPhase, WorkloadSource,
    WorkloadSpec, WorkloadStatus,
};

struct MockSource {
    declarations: Mutex<Vec<WorkloadDeclaration>>,
    writes: Mutex<Vec<(String, WorkloadStatus)>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MockSource {
    fn new() -> Self {
        Self {
            declarations: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn writes_for(&self, name: &str) -> Vec<WorkloadStatus> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl WorkloadSource for MockSource {
    async fn list(&self) -> SchedulerResult<Vec<WorkloadDeclaration>> {
        Ok(self.declarations.lock().unwrap().clone())
    }

    async fn write_status(
        &self,
        name: &str,
        _namespace: &str,
        status: WorkloadStatus,
    ) -> SchedulerResult<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(SchedulerError::StatusWrite {
                name: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.writes
            .lock()
            .unwrap()
            .push((name.to_string(), status));
        Ok(())
    }
}

fn spec(model_id: &str, enabled: bool) -> WorkloadSpec {
    serde_json::from_value(serde_json::json!({
        "modelId": model_id,
        "precision": "fp16",
        "priority": 0,
        "gpuSharing": { "enabled": enabled }
    }))
    .unwrap()
}

fn event(event_type: WorkloadEventType, name: &str, spec: Option<WorkloadSpec>) -> WorkloadEvent {
    WorkloadEvent {
        event_type,
        name: name.to_string(),
        namespace: "default".to_string(),
        spec,
    }
}

struct Fixture {
    scheduler: Arc<ModelScheduler>,
    source: Arc<MockSource>,
    metrics: Arc<InMemorySink>,
}

fn fixture(compute: ComputeMode, memory: MemoryMode) -> Fixture {
    let catalog = Arc::new(DeviceCatalog::builtin());
    let partitioner = Arc::new(Partitioner::new(
        catalog.clone(),
        Arc::new(NullDeviceController::new(8)),
        Arc::new(InMemorySink::new()),
        PartitionerConfig::default(),
    ));
    partitioner.initialize("MI300X", compute, memory).unwrap();
    Fixture {
        scheduler: Arc::new(ModelScheduler::new(catalog, partitioner)),
        source: Arc::new(MockSource::new()),
        metrics: Arc::new(InMemorySink::new()),
    }
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn test_added_workload_is_scheduled() {
    let f = fixture(ComputeMode::Cpx, MemoryMode::Quadrant);
    let controller = WorkloadController::new(
        f.scheduler.clone(),
        f.source.clone(),
        f.metrics.clone(),
    );
    let handle = controller.start(ControllerConfig::default());

    handle
        .submit(event(
            WorkloadEventType::Added,
            "llama-chat",
            Some(spec("meta-llama/Llama-3.1-8B-Instruct", true)),
        ))
        .await
        .unwrap();

    let source = f.source.clone();
    wait_for(|| !source.writes_for("llama-chat").is_empty()).await;
    handle.shutdown().await;

    let writes = f.source.writes_for("llama-chat");
    let status = writes.last().unwrap();
    assert_eq!(status.phase, WorkloadPhase::Running);
    let info = status.partition_info.as_ref().unwrap();
    assert_eq!(info.compute_mode, "cpx");
    assert_eq!(info.allocated_gb, 20.0);
    assert_eq!(status.conditions[0].reason, "Scheduled");
    assert_eq!(status.environment["ACCEL_PARTITION_ID"], info.partition_id.to_string());
    assert!(f
        .scheduler
        .instance("meta-llama/Llama-3.1-8B-Instruct")
        .is_some());
}

#[tokio::test]
async fn test_no_fit_reports_pending() {
    let f = fixture(ComputeMode::Cpx, MemoryMode::Quadrant);
    let handle = WorkloadController::new(
        f.scheduler.clone(),
        f.source.clone(),
        f.metrics.clone(),
    )
    .start(ControllerConfig::default());

    handle
        .submit(event(
            WorkloadEventType::Added,
            "llama-70b",
            Some(spec("meta-llama/Llama-3.3-70B-Instruct", true)),
        ))
        .await
        .unwrap();

    let source = f.source.clone();
    wait_for(|| !source.writes_for("llama-70b").is_empty()).await;
    handle.shutdown().await;

    let writes = f.source.writes_for("llama-70b");
    let status = writes.last().unwrap();
    assert_eq!(status.phase, WorkloadPhase::Pending);
    assert_eq!(status.conditions[0].reason, "NoFit");
    assert!(f
        .scheduler
        .instance("meta-llama/Llama-3.3-70B-Instruct")
        .is_none());

    let counters = f.metrics.counter_series();
    let no_fit = counters
        .iter()
        .find(|(name, labels, _)| {
            name == "workload_reconcile_total"
                && labels.pairs().contains(&("result".to_string(), "no_fit".to_string()))
        })
        .map(|(_, _, v)| *v);
    assert_eq!(no_fit, Some(1));
}

#[tokio::test]
async fn test_delete_unschedules() {
    let f = fixture(ComputeMode::Cpx, MemoryMode::Quadrant);
    let handle = WorkloadController::new(
        f.scheduler.clone(),
        f.source.clone(),
        f.metrics.clone(),
    )
    .start(ControllerConfig::default());

    let workload_spec = spec("mistralai/Mistral-7B-Instruct-v0.2", true);
    handle
        .submit(event(
            WorkloadEventType::Added,
            "mistral",
            Some(workload_spec.clone()),
        ))
        .await
        .unwrap();
    let scheduler = f.scheduler.clone();
    wait_for(|| scheduler.instance("mistralai/Mistral-7B-Instruct-v0.2").is_some()).await;

    handle
        .submit(event(
            WorkloadEventType::Deleted,
            "mistral",
            Some(workload_spec),
        ))
        .await
        .unwrap();
    let scheduler = f.scheduler.clone();
    wait_for(|| scheduler.instance("mistralai/Mistral-7B-Instruct-v0.2").is_none()).await;
    handle.shutdown().await;

    assert!(f.scheduler.validate().is_empty());
    // Deleting again is harmless.
}

#[tokio::test]
async fn test_sharing_disabled_is_ignored() {
    let f = fixture(ComputeMode::Single, MemoryMode::Uniform);
    let handle = WorkloadController::new(
        f.scheduler.clone(),
        f.source.clone(),
        f.metrics.clone(),
    )
    .start(ControllerConfig::default());

    handle
        .submit(event(
            WorkloadEventType::Added,
            "unmanaged",
            Some(spec("meta-llama/Llama-3.1-8B-Instruct", false)),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    assert!(f.source.writes_for("unmanaged").is_empty());
    assert!(f.scheduler.scheduled_models().is_empty());
}

#[tokio::test]
async fn test_resync_recovers_missed_event() {
    let f = fixture(ComputeMode::Cpx, MemoryMode::Quadrant);
    f.source
        .declarations
        .lock()
        .unwrap()
        .push(WorkloadDeclaration {
            name: "recovered".to_string(),
            namespace: "default".to_string(),
            spec: spec("meta-llama/Llama-3.1-8B-Instruct", true),
        });

    let handle = WorkloadController::new(
        f.scheduler.clone(),
        f.source.clone(),
        f.metrics.clone(),
    )
    .start(ControllerConfig {
        resync_interval_secs: 1,
        ..ControllerConfig::default()
    });

    // No event submitted; only the resync listing can schedule it.
    let scheduler = f.scheduler.clone();
    wait_for(|| scheduler.instance("meta-llama/Llama-3.1-8B-Instruct").is_some()).await;
    handle.shutdown().await;

    let writes = f.source.writes_for("recovered");
    assert_eq!(writes.last().unwrap().phase, WorkloadPhase::Running);
}

#[tokio::test]
async fn test_status_write_failure_leaves_scheduler_converged() {
    let f = fixture(ComputeMode::Cpx, MemoryMode::Quadrant);
    f.source
        .fail_writes
        .store(true, std::sync::atomic::Ordering::Relaxed);

    let handle = WorkloadController::new(
        f.scheduler.clone(),
        f.source.clone(),
        f.metrics.clone(),
    )
    .start(ControllerConfig::default());

    handle
        .submit(event(
            WorkloadEventType::Added,
            "llama-chat",
            Some(spec("meta-llama/Llama-3.1-8B-Instruct", true)),
        ))
        .await
        .unwrap();

    let metrics = f.metrics.clone();
    wait_for(move || {
        metrics.counter_series().iter().any(|(name, labels, v)| {
            name == "workload_reconcile_total"
                && labels.pairs().contains(&(
                    "result".to_string(),
                    "status_write_failed".to_string(),
                ))
                && *v >= 1
        })
    })
    .await;
    handle.shutdown().await;

    // Scheduling succeeded even though the write-back did not.
    assert!(f
        .scheduler
        .instance("meta-llama/Llama-3.1-8B-Instruct")
        .is_some());
    assert!(f.source.writes_for("llama-chat").is_empty());
}

#[test]
fn test_spec_wire_format() {
    let parsed: WorkloadSpec = serde_json::from_value(serde_json::json!({
        "modelId": "meta-llama/Llama-3.1-8B-Instruct",
        "precision": "int8",
        "priority": 10,
        "preferredPartition": 3,
        "gpuSharing": {
            "enabled": true,
            "memoryLimitGB": 20.0,
            "qosPriority": "high"
        }
    }))
    .unwrap();
    assert_eq!(parsed.model_id, "meta-llama/Llama-3.1-8B-Instruct");
    assert_eq!(parsed.precision, Precision::Int8);
    assert_eq!(parsed.preferred_partition, Some(3));
    assert!(parsed.sharing.enabled);
}
