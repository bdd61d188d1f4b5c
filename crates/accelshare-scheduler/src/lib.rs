#![warn(missing_docs)]

//! Accelshare scheduler subsystem: places model instances on logical
//! partitions and reconciles placement against a declarative workload set.

pub mod controller;
pub mod error;
pub mod instance;
pub mod scheduler;
pub mod workload;

pub use controller::{ControllerConfig, ControllerHandle, WorkloadController};
pub use error::{SchedulerError, SchedulerResult};
pub use instance::{ModelInstance, ModelStatus};
pub use scheduler::ModelScheduler;
pub use workload::{
    Condition, PartitionInfo, SharingSpec, WorkloadDeclaration, WorkloadEvent, WorkloadEventType,
    WorkloadPhase, WorkloadSource, WorkloadSpec, WorkloadStatus,
};
