//! Error types for the partition subsystem.

use thiserror::Error;

use crate::controller::{ComputeMode, MemoryMode};

/// Result type alias for partition operations.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Error variants for partition operations.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// The backing device controller could not complete an operation.
    #[error("Device unavailable: {reason}")]
    DeviceUnavailable {
        /// Description of the controller failure.
        reason: String,
    },

    /// The requested mode combination is not supported.
    #[error("Incompatible partition modes: compute={compute}, memory={memory}")]
    ModeIncompatible {
        /// Requested compute partition mode.
        compute: ComputeMode,
        /// Requested memory partition mode.
        memory: MemoryMode,
    },

    /// The device name is not present in the catalog.
    #[error("Unknown device: {name}")]
    UnknownDevice {
        /// The device name that was looked up.
        name: String,
    },

    /// The partitioner was already initialized.
    #[error("Partitioner already initialized for device {device}")]
    AlreadyInitialized {
        /// The device the partitioner is bound to.
        device: String,
    },

    /// The partitioner has not been initialized yet.
    #[error("Partitioner not initialized")]
    NotInitialized,

    /// The requested partition does not exist.
    #[error("Partition not found: {partition_id}")]
    PartitionNotFound {
        /// The partition id that was not found.
        partition_id: u32,
    },

    /// The partition does not have enough free memory.
    #[error(
        "Insufficient memory on partition {partition_id}: requested {requested} bytes, {available} bytes free"
    )]
    InsufficientMemory {
        /// The target partition.
        partition_id: u32,
        /// Bytes requested.
        requested: u64,
        /// Bytes currently free.
        available: u64,
    },

    /// The model is not resident on the given partition.
    #[error("Model {model_id} not resident on partition {partition_id}")]
    NotResident {
        /// The model that was looked up.
        model_id: String,
        /// The partition it was expected on.
        partition_id: u32,
    },
}
