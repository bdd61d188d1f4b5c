//! Declarative workload types and the orchestrator-facing `WorkloadSource`.
//!
//! The source delivers ADDED/MODIFIED/DELETED events and accepts PATCH-style
//! status write-backs. Delivery is at-least-once per level: the controller
//! never assumes it sees every intermediate MODIFIED.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use accelshare_partition::{ComputeMode, MemoryMode, Precision, GIB};
use accelshare_qos::QosLevel;

use crate::error::SchedulerResult;

/// Event type delivered by the workload source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadEventType {
    /// A new workload appeared.
    Added,
    /// An existing workload's declaration changed.
    Modified,
    /// The workload was removed.
    Deleted,
}

/// Co-location settings embedded in a workload declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingSpec {
    /// Gating flag: when false the controller ignores the workload.
    pub enabled: bool,
    /// Informational memory upper bound, GiB.
    #[serde(default, rename = "memoryLimitGB")]
    pub memory_limit_gb: Option<f64>,
    /// Data-plane priority for the workload's requests.
    #[serde(default)]
    pub qos_priority: Option<QosLevel>,
}

/// Declarative description of one workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Model identifier to deploy.
    pub model_id: String,
    /// Weight precision.
    pub precision: Precision,
    /// Placement priority; higher is more important.
    #[serde(default)]
    pub priority: i32,
    /// Partition the workload would like to land on.
    #[serde(default)]
    pub preferred_partition: Option<u32>,
    /// Accelerator sharing settings, including the management gate.
    #[serde(rename = "gpuSharing")]
    pub sharing: SharingSpec,
}

/// One event from the workload source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadEvent {
    /// What happened.
    pub event_type: WorkloadEventType,
    /// Workload name, unique within its namespace.
    pub name: String,
    /// Namespace the workload lives in.
    pub namespace: String,
    /// The declaration; absent on DELETED.
    pub spec: Option<WorkloadSpec>,
}

/// A workload's current declaration, as returned by a full listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadDeclaration {
    /// Workload name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// The declared spec.
    pub spec: WorkloadSpec,
}

/// Observed phase of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    /// Waiting for capacity.
    Pending,
    /// Placed and managed.
    Running,
    /// Reconciliation failed.
    Failed,
}

impl std::fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadPhase::Pending => f.write_str("Pending"),
            WorkloadPhase::Running => f.write_str("Running"),
            WorkloadPhase::Failed => f.write_str("Failed"),
        }
    }
}

/// Partition placement details written back to the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    /// Partition id the workload landed on.
    pub partition_id: u32,
    /// Compute partition mode label.
    pub compute_mode: String,
    /// Memory partition mode label.
    pub memory_mode: String,
    /// Partition budget, GiB.
    #[serde(rename = "capacityGB")]
    pub capacity_gb: f64,
    /// Bytes allocated on the partition, GiB.
    #[serde(rename = "allocatedGB")]
    pub allocated_gb: f64,
    /// Free bytes remaining, GiB.
    #[serde(rename = "availableGB")]
    pub available_gb: f64,
}

impl PartitionInfo {
    /// Builds placement details from a partition snapshot and mode labels.
    pub fn from_partition(
        partition: &accelshare_partition::Partition,
        compute: ComputeMode,
        memory: MemoryMode,
    ) -> Self {
        Self {
            partition_id: partition.id,
            compute_mode: compute.to_string(),
            memory_mode: memory.to_string(),
            capacity_gb: partition.capacity_bytes as f64 / GIB as f64,
            allocated_gb: partition.allocated_bytes as f64 / GIB as f64,
            available_gb: partition.free_bytes() as f64 / GIB as f64,
        }
    }
}

/// One observed-state condition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. "PartitionAllocated".
    pub condition_type: String,
    /// "True" or "False".
    pub status: String,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// Milliseconds since the epoch at the transition.
    pub transition_time_ms: u64,
}

impl Condition {
    /// Builds a condition record.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        transition_time_ms: u64,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            transition_time_ms,
        }
    }
}

/// Observed state written back to the source after each reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// Observed phase.
    pub phase: WorkloadPhase,
    /// Placement details, when placed.
    pub partition_info: Option<PartitionInfo>,
    /// Condition records, newest last.
    pub conditions: Vec<Condition>,
    /// Monotonically increasing update stamp, milliseconds.
    pub last_update_ms: u64,
    /// Runtime environment descriptor for the placed partition.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// The orchestrator-facing event stream and status sink.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Current declarations for every workload, used by the periodic resync.
    async fn list(&self) -> SchedulerResult<Vec<WorkloadDeclaration>>;

    /// PATCH-style status write-back for one workload.
    async fn write_status(
        &self,
        name: &str,
        namespace: &str,
        status: WorkloadStatus,
    ) -> SchedulerResult<()>;
}
