#![warn(missing_docs)]

//! Accelshare partition subsystem: device catalog, model memory sizing, and
//! the partitioner that carves one physical accelerator into logical devices.

pub mod catalog;
pub mod controller;
pub mod error;
pub mod partitioner;

pub use catalog::{DeviceCatalog, DeviceSpec, ModelSizeEntry, Precision, GIB};
pub use controller::{ComputeMode, DeviceController, MemoryMode, NullDeviceController};
pub use error::{PartitionError, PartitionResult};
pub use partitioner::{Partition, PartitionBootConfig, Partitioner, PartitionerConfig};
