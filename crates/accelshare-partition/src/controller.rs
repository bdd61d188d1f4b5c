//! The `DeviceController` interface, the only contact with hardware tooling.
//!
//! Implementations wrap vendor utilities (mode switches may be slow and may
//! need elevated privileges); the partitioner assumes nothing beyond this
//! contract. `NullDeviceController` satisfies it for tests and dry runs.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{PartitionError, PartitionResult};

/// Compute partition mode: one logical device, or one per sub-device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMode {
    /// All compute units presented as a single logical device.
    Single,
    /// Each sub-device presented as a separate logical device.
    Cpx,
}

impl std::fmt::Display for ComputeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeMode::Single => f.write_str("single"),
            ComputeMode::Cpx => f.write_str("cpx"),
        }
    }
}

/// Memory partition mode: whole pool visible, or per-quadrant local shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// All memory accessible to every logical device.
    Uniform,
    /// Each sub-device addresses its local quadrant share. Requires `Cpx`.
    Quadrant,
}

impl std::fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryMode::Uniform => f.write_str("uniform"),
            MemoryMode::Quadrant => f.write_str("quadrant"),
        }
    }
}

/// Abstract contact point with the accelerator tooling.
pub trait DeviceController: Send + Sync {
    /// Current compute and memory partition modes.
    fn current_mode(&self) -> PartitionResult<(ComputeMode, MemoryMode)>;

    /// Sets the compute partition mode. May be slow; callers check
    /// `current_mode` first and skip the call when already set.
    fn set_compute_mode(&self, mode: ComputeMode) -> PartitionResult<()>;

    /// Sets the memory partition mode. Same caveats as `set_compute_mode`.
    fn set_memory_mode(&self, mode: MemoryMode) -> PartitionResult<()>;

    /// Returns the device to its default modes.
    fn reset(&self) -> PartitionResult<()>;

    /// Number of logical devices the hardware exposes in `Cpx` mode.
    ///
    /// This is the capability query that settles how many equal memory
    /// shares a compute-partitioned device yields; vendor tooling disagrees
    /// on the answer, so the controller owns it.
    fn sub_device_count(&self) -> u32;
}

/// In-memory controller for tests and environments without vendor tooling.
pub struct NullDeviceController {
    modes: Mutex<(ComputeMode, MemoryMode)>,
    sub_devices: u32,
    fail_sets: bool,
    set_calls: AtomicU64,
    query_calls: AtomicU64,
}

impl NullDeviceController {
    /// Controller with the given sub-device count, starting at defaults
    /// (`single` / `uniform`).
    pub fn new(sub_devices: u32) -> Self {
        Self {
            modes: Mutex::new((ComputeMode::Single, MemoryMode::Uniform)),
            sub_devices,
            fail_sets: false,
            set_calls: AtomicU64::new(0),
            query_calls: AtomicU64::new(0),
        }
    }

    /// Controller whose mode-set operations always fail, for exercising the
    /// unavailable-device path.
    pub fn failing(sub_devices: u32) -> Self {
        Self {
            fail_sets: true,
            ..Self::new(sub_devices)
        }
    }

    /// Number of mode-set operations performed.
    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::Relaxed)
    }

    /// Number of `current_mode` queries performed.
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::Relaxed)
    }
}

impl DeviceController for NullDeviceController {
    fn current_mode(&self) -> PartitionResult<(ComputeMode, MemoryMode)> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        Ok(*self.modes.lock())
    }

    fn set_compute_mode(&self, mode: ComputeMode) -> PartitionResult<()> {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_sets {
            return Err(PartitionError::DeviceUnavailable {
                reason: "mode switch rejected by tooling".to_string(),
            });
        }
        self.modes.lock().0 = mode;
        Ok(())
    }

    fn set_memory_mode(&self, mode: MemoryMode) -> PartitionResult<()> {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_sets {
            return Err(PartitionError::DeviceUnavailable {
                reason: "mode switch rejected by tooling".to_string(),
            });
        }
        self.modes.lock().1 = mode;
        Ok(())
    }

    fn reset(&self) -> PartitionResult<()> {
        *self.modes.lock() = (ComputeMode::Single, MemoryMode::Uniform);
        Ok(())
    }

    fn sub_device_count(&self) -> u32 {
        self.sub_devices
    }
}
