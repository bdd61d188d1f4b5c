//! Model instance lifecycle types.

use serde::{Deserialize, Serialize};

use accelshare_partition::Precision;

/// Deployment status of a model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Declared but not yet placed.
    Pending,
    /// Placed on a partition, not serving yet.
    Scheduled,
    /// Serving traffic.
    Running,
    /// Stopped by an operator.
    Stopped,
    /// Placement or startup failed.
    Failed,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelStatus::Pending => f.write_str("pending"),
            ModelStatus::Scheduled => f.write_str("scheduled"),
            ModelStatus::Running => f.write_str("running"),
            ModelStatus::Stopped => f.write_str("stopped"),
            ModelStatus::Failed => f.write_str("failed"),
        }
    }
}

/// One model instance resident on a partition. Cross-references are by
/// identifier only; the partition owns the authoritative allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInstance {
    /// Model identifier, unique per scheduler.
    pub model_id: String,
    /// Weight precision the instance was sized for.
    pub precision: Precision,
    /// Partition the instance lives on.
    pub partition_id: u32,
    /// Lifecycle status.
    pub status: ModelStatus,
    /// Bytes allocated on the partition for this instance.
    pub allocated_bytes: u64,
    /// Priority; higher is more important.
    pub priority: i32,
}
