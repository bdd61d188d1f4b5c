//! Error types for the scheduler subsystem.

use thiserror::Error;

use accelshare_partition::PartitionError;

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error variants for scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No partition has enough free memory for the model.
    #[error("No partition fits model {model_id} ({required} bytes required)")]
    NoFit {
        /// The model that could not be placed.
        model_id: String,
        /// Bytes the model requires.
        required: u64,
    },

    /// The model is not known to the scheduler.
    #[error("Model not scheduled: {model_id}")]
    NotFound {
        /// The model that was looked up.
        model_id: String,
    },

    /// A partitioner operation failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Writing observed state back to the workload source failed.
    #[error("Status write for workload {name} failed: {reason}")]
    StatusWrite {
        /// The workload whose status could not be written.
        name: String,
        /// Description of the failure.
        reason: String,
    },
}
