//! Workload controller: converges scheduler state to the declared workload
//! set.
//!
//! Events are routed to a small worker pool keyed by a stable hash of the
//! workload name, so events for one workload are serialized while distinct
//! workloads reconcile concurrently. Reconciliation is level-driven: the
//! latest declaration wins, and a periodic resync re-lists every workload so
//! missed MODIFIED events self-heal.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use accelshare_metrics::{LabelSet, MetricsSink};

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::ModelScheduler;
use crate::workload::{
    Condition, PartitionInfo, WorkloadEvent, WorkloadEventType, WorkloadPhase, WorkloadSource,
    WorkloadSpec, WorkloadStatus,
};

/// Controller tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Worker tasks reconciling distinct workloads concurrently.
    pub workers: usize,
    /// Capacity of the event channels.
    pub channel_capacity: usize,
    /// Interval between full resyncs, seconds.
    pub resync_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_capacity: 256,
            resync_interval_secs: 30,
        }
    }
}

/// Handle to a running controller: event submission and shutdown.
pub struct ControllerHandle {
    events_tx: mpsc::Sender<WorkloadEvent>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ControllerHandle {
    /// Submits one workload event for reconciliation.
    pub async fn submit(&self, event: WorkloadEvent) -> SchedulerResult<()> {
        self.events_tx
            .send(event)
            .await
            .map_err(|e| SchedulerError::StatusWrite {
                name: e.0.name.clone(),
                reason: "controller shut down".to_string(),
            })
    }

    /// Signals shutdown and waits for in-flight reconciles to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        drop(self.events_tx);
        let _ = self.join.await;
    }
}

/// Drives convergence between declared workloads and scheduler state.
pub struct WorkloadController {
    scheduler: Arc<ModelScheduler>,
    source: Arc<dyn WorkloadSource>,
    metrics: Arc<dyn MetricsSink>,
}

impl WorkloadController {
    /// Creates a controller over one scheduler and one workload source.
    pub fn new(
        scheduler: Arc<ModelScheduler>,
        source: Arc<dyn WorkloadSource>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            scheduler,
            source,
            metrics,
        }
    }

    /// Spawns the dispatcher and worker pool. Returns the handle used to
    /// feed events and to stop the controller.
    pub fn start(self, config: ControllerConfig) -> ControllerHandle {
        let (events_tx, mut events_rx) = mpsc::channel::<WorkloadEvent>(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = config.workers.max(1);
        let mut worker_txs = Vec::with_capacity(workers);
        let mut worker_joins = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<WorkloadEvent>(config.channel_capacity);
            worker_txs.push(tx);
            let scheduler = self.scheduler.clone();
            let source = self.source.clone();
            let metrics = self.metrics.clone();
            let mut worker_shutdown = shutdown_rx.clone();
            worker_joins.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = rx.recv() => {
                            match event {
                                Some(event) => {
                                    reconcile(&scheduler, &source, &metrics, event).await;
                                }
                                None => break,
                            }
                        }
                        _ = worker_shutdown.changed() => {
                            debug!(worker_id, "worker stopping on shutdown signal");
                            break;
                        }
                    }
                }
            }));
        }

        let source = self.source.clone();
        let mut dispatcher_shutdown = shutdown_rx;
        let resync_interval = Duration::from_secs(config.resync_interval_secs.max(1));
        let join = tokio::spawn(async move {
            let mut resync = tokio::time::interval(resync_interval);
            // The first tick fires immediately; skip it so startup order is
            // driven by the watch stream.
            resync.tick().await;

            loop {
                tokio::select! {
                    event = events_rx.recv() => {
                        match event {
                            Some(event) => route(&worker_txs, event).await,
                            None => break,
                        }
                    }
                    _ = resync.tick() => {
                        match source.list().await {
                            Ok(declarations) => {
                                debug!(count = declarations.len(), "resync listing");
                                for decl in declarations {
                                    let event = WorkloadEvent {
                                        event_type: WorkloadEventType::Modified,
                                        name: decl.name,
                                        namespace: decl.namespace,
                                        spec: Some(decl.spec),
                                    };
                                    route(&worker_txs, event).await;
                                }
                            }
                            Err(err) => warn!(%err, "resync listing failed"),
                        }
                    }
                    _ = dispatcher_shutdown.changed() => {
                        info!("controller stopping on shutdown signal");
                        break;
                    }
                }
            }

            drop(worker_txs);
            for join in worker_joins {
                let _ = join.await;
            }
        });

        ControllerHandle {
            events_tx,
            shutdown_tx,
            join,
        }
    }
}

async fn route(worker_txs: &[mpsc::Sender<WorkloadEvent>], event: WorkloadEvent) {
    let mut hasher = DefaultHasher::new();
    event.name.hash(&mut hasher);
    event.namespace.hash(&mut hasher);
    let idx = (hasher.finish() % worker_txs.len() as u64) as usize;
    if worker_txs[idx].send(event).await.is_err() {
        warn!("worker channel closed, dropping event");
    }
}

async fn reconcile(
    scheduler: &Arc<ModelScheduler>,
    source: &Arc<dyn WorkloadSource>,
    metrics: &Arc<dyn MetricsSink>,
    event: WorkloadEvent,
) {
    match event.event_type {
        WorkloadEventType::Deleted => {
            // DELETED may arrive without the final object; the workload name
            // doubles as the instance key in that case.
            let model_id = event
                .spec
                .as_ref()
                .map(|s| s.model_id.clone())
                .unwrap_or_else(|| event.name.clone());
            match scheduler.unschedule(&model_id) {
                Ok(()) => {
                    count_reconcile(metrics, "deleted");
                    info!(workload = %event.name, model_id, "workload removed");
                }
                Err(SchedulerError::NotFound { .. }) => {
                    debug!(workload = %event.name, model_id, "delete for unknown model");
                }
                Err(err) => {
                    count_reconcile(metrics, "failed");
                    warn!(workload = %event.name, %err, "unschedule failed");
                }
            }
        }
        WorkloadEventType::Added | WorkloadEventType::Modified => {
            let Some(spec) = event.spec.clone() else {
                warn!(workload = %event.name, "event without spec, ignoring");
                return;
            };
            if !spec.sharing.enabled {
                debug!(workload = %event.name, "sharing disabled, ignoring");
                return;
            }
            reconcile_spec(scheduler, source, metrics, &event, spec).await;
        }
    }
}

async fn reconcile_spec(
    scheduler: &Arc<ModelScheduler>,
    source: &Arc<dyn WorkloadSource>,
    metrics: &Arc<dyn MetricsSink>,
    event: &WorkloadEvent,
    spec: WorkloadSpec,
) {
    let now_ms = epoch_ms();
    let status = match scheduler.schedule(
        &spec.model_id,
        spec.precision,
        spec.priority,
        spec.preferred_partition,
    ) {
        Ok(partition_id) => {
            count_reconcile(metrics, "ok");
            let partition = scheduler.partitioner().partition(partition_id);
            let modes = scheduler.partitioner().modes();
            let partition_info = match (partition, modes) {
                (Some(partition), Some((compute, memory))) => {
                    Some(PartitionInfo::from_partition(&partition, compute, memory))
                }
                _ => None,
            };
            let environment = scheduler.environment(partition_id).unwrap_or_default();
            WorkloadStatus {
                phase: WorkloadPhase::Running,
                partition_info,
                conditions: vec![Condition::new(
                    "PartitionAllocated",
                    true,
                    "Scheduled",
                    &format!("model scheduled on partition {partition_id}"),
                    now_ms,
                )],
                last_update_ms: now_ms,
                environment,
            }
        }
        Err(SchedulerError::NoFit { required, .. }) => {
            count_reconcile(metrics, "no_fit");
            WorkloadStatus {
                phase: WorkloadPhase::Pending,
                partition_info: None,
                conditions: vec![Condition::new(
                    "PartitionAllocated",
                    false,
                    "NoFit",
                    &format!("no partition with {required} free bytes"),
                    now_ms,
                )],
                last_update_ms: now_ms,
                environment: Default::default(),
            }
        }
        Err(err) => {
            count_reconcile(metrics, "failed");
            warn!(workload = %event.name, %err, "reconcile failed");
            WorkloadStatus {
                phase: WorkloadPhase::Failed,
                partition_info: None,
                conditions: vec![Condition::new(
                    "PartitionAllocated",
                    false,
                    "SchedulingFailed",
                    &err.to_string(),
                    now_ms,
                )],
                last_update_ms: now_ms,
                environment: Default::default(),
            }
        }
    };

    // Reconcile failures are reported through the status write; the next
    // MODIFIED or resync drives the retry.
    if let Err(err) = source
        .write_status(&event.name, &event.namespace, status)
        .await
    {
        count_reconcile(metrics, "status_write_failed");
        warn!(workload = %event.name, %err, "status write failed");
    }
}

fn count_reconcile(metrics: &Arc<dyn MetricsSink>, result: &str) {
    metrics
        .counter(
            "workload_reconcile_total",
            &LabelSet::new(&[("result", result)]),
        )
        .inc();
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
