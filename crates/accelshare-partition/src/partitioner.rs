//! Partitioner: exclusive owner of one physical accelerator.
//!
//! Sets compute/memory partition modes through the `DeviceController`,
//! enumerates logical partitions with explicit memory budgets, and tracks
//! per-partition model allocations. All mutation happens under one writer
//! lock; queries take the shared side.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use accelshare_metrics::{LabelSet, MetricsSink};

use crate::catalog::{DeviceCatalog, DeviceSpec, Precision};
use crate::controller::{ComputeMode, DeviceController, MemoryMode};
use crate::error::{PartitionError, PartitionResult};

/// Partitioner tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionerConfig {
    /// Bytes reserved for the runtime, taken off the pool before the pool is
    /// divided into partition shares.
    pub system_overhead_bytes: u64,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            system_overhead_bytes: 0,
        }
    }
}

/// Declarative boot target: which device to partition and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionBootConfig {
    /// Device class name to initialize.
    pub device: String,
    /// Compute partition mode to set at boot.
    pub compute: ComputeMode,
    /// Memory partition mode to set at boot.
    pub memory: MemoryMode,
}

/// Snapshot view of one logical partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    /// Dense 0-based partition id.
    pub id: u32,
    /// Hardware sub-device index backing this partition, if compute-split.
    pub sub_device: Option<u32>,
    /// Memory budget in bytes.
    pub capacity_bytes: u64,
    /// Bytes currently allocated to resident models.
    pub allocated_bytes: u64,
    /// Resident model ids in allocation (FIFO) order.
    pub residents: Vec<String>,
    /// Whether the partition accepts allocations.
    pub active: bool,
}

impl Partition {
    /// Free bytes remaining.
    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.allocated_bytes)
    }
}

#[derive(Debug, Clone)]
struct Resident {
    model_id: String,
    bytes: u64,
}

#[derive(Debug)]
struct PartitionState {
    id: u32,
    sub_device: Option<u32>,
    capacity_bytes: u64,
    allocated_bytes: u64,
    residents: Vec<Resident>,
    active: bool,
}

impl PartitionState {
    fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.allocated_bytes)
    }

    fn snapshot(&self) -> Partition {
        Partition {
            id: self.id,
            sub_device: self.sub_device,
            capacity_bytes: self.capacity_bytes,
            allocated_bytes: self.allocated_bytes,
            residents: self.residents.iter().map(|r| r.model_id.clone()).collect(),
            active: self.active,
        }
    }
}

struct Inner {
    device: Option<DeviceSpec>,
    compute_mode: Option<ComputeMode>,
    memory_mode: Option<MemoryMode>,
    partitions: Vec<PartitionState>,
}

/// Exclusive owner of one physical device's partition state.
pub struct Partitioner {
    catalog: Arc<DeviceCatalog>,
    controller: Arc<dyn DeviceController>,
    metrics: Arc<dyn MetricsSink>,
    config: PartitionerConfig,
    inner: RwLock<Inner>,
}

impl Partitioner {
    /// Creates an uninitialized partitioner bound to one device controller.
    pub fn new(
        catalog: Arc<DeviceCatalog>,
        controller: Arc<dyn DeviceController>,
        metrics: Arc<dyn MetricsSink>,
        config: PartitionerConfig,
    ) -> Self {
        Self {
            catalog,
            controller,
            metrics,
            config,
            inner: RwLock::new(Inner {
                device: None,
                compute_mode: None,
                memory_mode: None,
                partitions: Vec::new(),
            }),
        }
    }

    /// Initializes from a declarative boot config.
    pub fn initialize_from(&self, boot: &PartitionBootConfig) -> PartitionResult<()> {
        self.initialize(&boot.device, boot.compute, boot.memory)
    }

    /// Sets partition modes and establishes the logical partitions.
    ///
    /// Idempotence: if the controller already reports the requested modes, no
    /// mode-set is issued. `single` yields one partition of the whole pool;
    /// `cpx` yields one partition per hardware sub-device, each with an equal
    /// share of `total_memory - system_overhead`.
    pub fn initialize(
        &self,
        device_name: &str,
        compute: ComputeMode,
        memory: MemoryMode,
    ) -> PartitionResult<()> {
        let mut inner = self.inner.write();

        if let Some(device) = &inner.device {
            return Err(PartitionError::AlreadyInitialized {
                device: device.name.clone(),
            });
        }

        let spec = self
            .catalog
            .lookup_device(device_name)
            .ok_or_else(|| PartitionError::UnknownDevice {
                name: device_name.to_string(),
            })?
            .clone();

        if memory == MemoryMode::Quadrant && compute != ComputeMode::Cpx {
            return Err(PartitionError::ModeIncompatible { compute, memory });
        }
        if !spec.compute_modes.contains(&compute) || !spec.memory_modes.contains(&memory) {
            return Err(PartitionError::ModeIncompatible { compute, memory });
        }

        let (current_compute, current_memory) = self.controller.current_mode()?;
        if current_compute != compute {
            self.controller.set_compute_mode(compute)?;
        } else {
            debug!(device = %spec.name, mode = %compute, "compute mode already set");
        }
        if current_memory != memory {
            self.controller.set_memory_mode(memory)?;
        } else {
            debug!(device = %spec.name, mode = %memory, "memory mode already set");
        }

        let count = match compute {
            ComputeMode::Single => 1,
            ComputeMode::Cpx => self.controller.sub_device_count().max(1),
        };
        let pool = spec
            .total_memory_bytes
            .saturating_sub(self.config.system_overhead_bytes);
        let share = pool / count as u64;

        inner.partitions = (0..count)
            .map(|i| PartitionState {
                id: i,
                sub_device: match compute {
                    ComputeMode::Cpx => Some(i),
                    ComputeMode::Single => None,
                },
                capacity_bytes: share,
                allocated_bytes: 0,
                residents: Vec::new(),
                active: true,
            })
            .collect();

        self.metrics
            .gauge(
                "partition_count",
                &LabelSet::new(&[("device", spec.name.as_str())]),
            )
            .set(count as f64);
        for p in &inner.partitions {
            let id = p.id.to_string();
            self.metrics
                .gauge("partition_memory_bytes", &LabelSet::new(&[("id", id.as_str())]))
                .set(p.capacity_bytes as f64);
            self.metrics
                .gauge(
                    "partition_allocated_bytes",
                    &LabelSet::new(&[("id", id.as_str())]),
                )
                .set(0.0);
        }

        info!(
            device = %spec.name,
            %compute,
            %memory,
            partitions = count,
            share_bytes = share,
            "partitioner initialized"
        );

        inner.device = Some(spec);
        inner.compute_mode = Some(compute);
        inner.memory_mode = Some(memory);
        Ok(())
    }

    /// Allocates a model's memory on a partition. Resident order is FIFO.
    pub fn allocate(
        &self,
        model_id: &str,
        partition_id: u32,
        precision: Precision,
    ) -> PartitionResult<()> {
        let size = self.catalog.estimate_model_memory(model_id, precision);
        let mut inner = self.inner.write();
        if inner.device.is_none() {
            return Err(PartitionError::NotInitialized);
        }

        let partition = match inner.partitions.get_mut(partition_id as usize) {
            Some(p) => p,
            None => {
                self.count_allocate("not_found");
                return Err(PartitionError::PartitionNotFound { partition_id });
            }
        };

        let available = partition.free_bytes();
        if size > available {
            self.count_allocate("insufficient");
            return Err(PartitionError::InsufficientMemory {
                partition_id,
                requested: size,
                available,
            });
        }

        partition.allocated_bytes += size;
        partition.residents.push(Resident {
            model_id: model_id.to_string(),
            bytes: size,
        });

        let allocated = partition.allocated_bytes;
        let capacity = partition.capacity_bytes;
        self.count_allocate("ok");
        self.record_allocation_gauges(partition_id, allocated, capacity);
        debug!(model_id, partition_id, bytes = size, "allocated model memory");
        Ok(())
    }

    /// Releases a model's memory from a partition.
    pub fn deallocate(&self, model_id: &str, partition_id: u32) -> PartitionResult<()> {
        let mut inner = self.inner.write();
        if inner.device.is_none() {
            return Err(PartitionError::NotInitialized);
        }

        let partition = inner
            .partitions
            .get_mut(partition_id as usize)
            .ok_or(PartitionError::PartitionNotFound { partition_id })?;

        let idx = partition
            .residents
            .iter()
            .position(|r| r.model_id == model_id)
            .ok_or_else(|| PartitionError::NotResident {
                model_id: model_id.to_string(),
                partition_id,
            })?;

        let resident = partition.residents.remove(idx);
        partition.allocated_bytes = partition.allocated_bytes.saturating_sub(resident.bytes);

        let allocated = partition.allocated_bytes;
        let capacity = partition.capacity_bytes;
        self.record_allocation_gauges(partition_id, allocated, capacity);
        debug!(model_id, partition_id, bytes = resident.bytes, "deallocated model memory");
        Ok(())
    }

    /// Partitions with at least `min_bytes` free, ordered by descending free
    /// bytes, ties broken by ascending id.
    pub fn available_partitions(&self, min_bytes: u64) -> Vec<u32> {
        let inner = self.inner.read();
        let mut candidates: Vec<(u64, u32)> = inner
            .partitions
            .iter()
            .filter(|p| p.active && p.free_bytes() >= min_bytes)
            .map(|p| (p.free_bytes(), p.id))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        candidates.into_iter().map(|(_, id)| id).collect()
    }

    /// Per-partition utilization fraction in [0, 1].
    pub fn utilization(&self) -> BTreeMap<u32, f64> {
        let inner = self.inner.read();
        inner
            .partitions
            .iter()
            .map(|p| {
                let frac = if p.capacity_bytes == 0 {
                    0.0
                } else {
                    p.allocated_bytes as f64 / p.capacity_bytes as f64
                };
                (p.id, frac)
            })
            .collect()
    }

    /// Snapshot of one partition.
    pub fn partition(&self, partition_id: u32) -> Option<Partition> {
        let inner = self.inner.read();
        inner
            .partitions
            .get(partition_id as usize)
            .map(|p| p.snapshot())
    }

    /// Snapshot of every partition, id order.
    pub fn partitions(&self) -> Vec<Partition> {
        let inner = self.inner.read();
        inner.partitions.iter().map(|p| p.snapshot()).collect()
    }

    /// Partition count; zero before initialization.
    pub fn partition_count(&self) -> u32 {
        self.inner.read().partitions.len() as u32
    }

    /// Current partition modes, once initialized.
    pub fn modes(&self) -> Option<(ComputeMode, MemoryMode)> {
        let inner = self.inner.read();
        inner.compute_mode.zip(inner.memory_mode)
    }

    /// Descriptor map telling a downstream runtime which logical device and
    /// partition metadata to expose. Strictly derived from current state.
    pub fn environment_for(&self, partition_id: u32) -> PartitionResult<BTreeMap<String, String>> {
        let inner = self.inner.read();
        if inner.device.is_none() {
            return Err(PartitionError::NotInitialized);
        }
        let partition = inner
            .partitions
            .get(partition_id as usize)
            .ok_or(PartitionError::PartitionNotFound { partition_id })?;

        let mut env = BTreeMap::new();
        env.insert(
            "ACCEL_VISIBLE_DEVICES".to_string(),
            partition.sub_device.unwrap_or(0).to_string(),
        );
        env.insert("ACCEL_PARTITION_ID".to_string(), partition.id.to_string());
        env.insert(
            "ACCEL_PARTITION_MEMORY_BYTES".to_string(),
            partition.capacity_bytes.to_string(),
        );
        if let Some(mode) = inner.compute_mode {
            env.insert("ACCEL_COMPUTE_MODE".to_string(), mode.to_string());
        }
        if let Some(mode) = inner.memory_mode {
            env.insert("ACCEL_MEMORY_MODE".to_string(), mode.to_string());
        }
        if let Some(sub) = partition.sub_device {
            env.insert("ACCEL_SUB_DEVICE".to_string(), sub.to_string());
        }
        Ok(env)
    }

    /// Releases all partitions and returns the device to its default modes.
    pub fn reset(&self) -> PartitionResult<()> {
        let mut inner = self.inner.write();
        if inner.device.is_none() {
            return Err(PartitionError::NotInitialized);
        }
        self.controller.reset()?;
        let device = inner.device.take();
        inner.compute_mode = None;
        inner.memory_mode = None;
        inner.partitions.clear();
        if let Some(device) = device {
            info!(device = %device.name, "partitioner reset");
        }
        Ok(())
    }

    /// Post-condition checker. Empty result means the state is consistent.
    pub fn validate(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut errors = Vec::new();

        for p in &inner.partitions {
            if p.allocated_bytes > p.capacity_bytes {
                errors.push(format!(
                    "partition {} over-allocated: {} bytes in {} byte budget",
                    p.id, p.allocated_bytes, p.capacity_bytes
                ));
            }
            let resident_sum: u64 = p.residents.iter().map(|r| r.bytes).sum();
            if resident_sum != p.allocated_bytes {
                errors.push(format!(
                    "partition {} allocation drift: residents sum {} != allocated {}",
                    p.id, resident_sum, p.allocated_bytes
                ));
            }
        }

        if let Some(device) = &inner.device {
            let capacity_sum: u64 = inner.partitions.iter().map(|p| p.capacity_bytes).sum();
            if capacity_sum + self.config.system_overhead_bytes > device.total_memory_bytes {
                errors.push(format!(
                    "partition budgets exceed device memory: {} + {} overhead > {}",
                    capacity_sum, self.config.system_overhead_bytes, device.total_memory_bytes
                ));
            }
        }

        if !errors.is_empty() {
            warn!(count = errors.len(), "partition validation failed");
        }
        errors
    }

    fn count_allocate(&self, status: &str) {
        self.metrics
            .counter(
                "partition_allocate_total",
                &LabelSet::new(&[("status", status)]),
            )
            .inc();
    }

    fn record_allocation_gauges(&self, partition_id: u32, allocated: u64, capacity: u64) {
        let id = partition_id.to_string();
        self.metrics
            .gauge(
                "partition_allocated_bytes",
                &LabelSet::new(&[("id", id.as_str())]),
            )
            .set(allocated as f64);
        if capacity > 0 {
            self.metrics
                .histogram("partition_utilization", &LabelSet::empty())
                .observe(allocated as f64 / capacity as f64);
        }
    }
}
