//! Model scheduler: owns the instance map and drives the partitioner.
//!
//! Lock order: the scheduler lock is taken strictly before any partitioner
//! lock. Nothing here calls back into the scheduler from partitioner code.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use accelshare_partition::{
    DeviceCatalog, PartitionError, Partitioner, Precision,
};

use crate::error::{SchedulerError, SchedulerResult};
use crate::instance::{ModelInstance, ModelStatus};

struct SchedulerState {
    instances: HashMap<String, ModelInstance>,
    by_partition: HashMap<u32, Vec<String>>,
}

/// Places model instances on partitions and tracks their lifecycle.
pub struct ModelScheduler {
    catalog: Arc<DeviceCatalog>,
    partitioner: Arc<Partitioner>,
    state: Mutex<SchedulerState>,
}

impl ModelScheduler {
    /// Creates a scheduler over one partitioner.
    pub fn new(catalog: Arc<DeviceCatalog>, partitioner: Arc<Partitioner>) -> Self {
        Self {
            catalog,
            partitioner,
            state: Mutex::new(SchedulerState {
                instances: HashMap::new(),
                by_partition: HashMap::new(),
            }),
        }
    }

    /// Schedules a model, returning the chosen partition id.
    ///
    /// Idempotent: a model that is already scheduled keeps its placement.
    /// Placement prefers `preferred_partition` when it fits, otherwise the
    /// partition with the most free memory (ties to the smallest id). A
    /// partition that fills up between selection and allocation is skipped
    /// and the next candidate tried.
    pub fn schedule(
        &self,
        model_id: &str,
        precision: Precision,
        priority: i32,
        preferred_partition: Option<u32>,
    ) -> SchedulerResult<u32> {
        let mut state = self.state.lock().unwrap();

        if let Some(instance) = state.instances.get(model_id) {
            debug!(model_id, partition_id = instance.partition_id, "already scheduled");
            return Ok(instance.partition_id);
        }

        let required = self.catalog.estimate_model_memory(model_id, precision);

        let mut candidates: Vec<u32> = Vec::new();
        if let Some(preferred) = preferred_partition {
            if let Some(partition) = self.partitioner.partition(preferred) {
                if partition.free_bytes() >= required {
                    candidates.push(preferred);
                }
            }
        }
        candidates.extend(
            self.partitioner
                .available_partitions(required)
                .into_iter()
                .filter(|id| Some(*id) != preferred_partition),
        );

        if candidates.is_empty() {
            return Err(SchedulerError::NoFit {
                model_id: model_id.to_string(),
                required,
            });
        }

        let mut last_err = None;
        for partition_id in candidates {
            match self.partitioner.allocate(model_id, partition_id, precision) {
                Ok(()) => {
                    let instance = ModelInstance {
                        model_id: model_id.to_string(),
                        precision,
                        partition_id,
                        status: ModelStatus::Scheduled,
                        allocated_bytes: required,
                        priority,
                    };
                    state.instances.insert(model_id.to_string(), instance);
                    state
                        .by_partition
                        .entry(partition_id)
                        .or_default()
                        .push(model_id.to_string());
                    info!(
                        model_id,
                        partition_id,
                        precision = %precision,
                        priority,
                        bytes = required,
                        "scheduled model"
                    );
                    return Ok(partition_id);
                }
                Err(PartitionError::InsufficientMemory { .. }) => {
                    debug!(model_id, partition_id, "partition filled up, trying next");
                    continue;
                }
                Err(err) => {
                    last_err = Some(err);
                    break;
                }
            }
        }

        match last_err {
            Some(err) => Err(err.into()),
            None => Err(SchedulerError::NoFit {
                model_id: model_id.to_string(),
                required,
            }),
        }
    }

    /// Removes a model and releases its memory.
    pub fn unschedule(&self, model_id: &str) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let instance = state
            .instances
            .remove(model_id)
            .ok_or_else(|| SchedulerError::NotFound {
                model_id: model_id.to_string(),
            })?;

        match self.partitioner.deallocate(model_id, instance.partition_id) {
            Ok(()) => {}
            Err(PartitionError::NotResident { .. }) => {
                // Nothing left to release; keep unschedule idempotent.
                warn!(model_id, partition_id = instance.partition_id, "model was not resident");
            }
            Err(err) => {
                // Restore the instance so state stays coherent with the
                // partition's books.
                state.instances.insert(model_id.to_string(), instance);
                return Err(err.into());
            }
        }

        if let Some(models) = state.by_partition.get_mut(&instance.partition_id) {
            models.retain(|m| m != model_id);
        }
        info!(model_id, partition_id = instance.partition_id, "unscheduled model");
        Ok(())
    }

    /// Updates the lifecycle status of a scheduled model.
    pub fn update_status(&self, model_id: &str, status: ModelStatus) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let instance = state
            .instances
            .get_mut(model_id)
            .ok_or_else(|| SchedulerError::NotFound {
                model_id: model_id.to_string(),
            })?;
        debug!(model_id, from = %instance.status, to = %status, "status update");
        instance.status = status;
        Ok(())
    }

    /// Runtime environment descriptor for a partition.
    pub fn environment(&self, partition_id: u32) -> SchedulerResult<BTreeMap<String, String>> {
        Ok(self.partitioner.environment_for(partition_id)?)
    }

    /// Snapshot of one instance.
    pub fn instance(&self, model_id: &str) -> Option<ModelInstance> {
        self.state.lock().unwrap().instances.get(model_id).cloned()
    }

    /// All scheduled model ids.
    pub fn scheduled_models(&self) -> Vec<String> {
        self.state.lock().unwrap().instances.keys().cloned().collect()
    }

    /// Model ids currently in `Running` state.
    pub fn running_models(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .instances
            .values()
            .filter(|i| i.status == ModelStatus::Running)
            .map(|i| i.model_id.clone())
            .collect()
    }

    /// Models resident on one partition, in scheduling order.
    pub fn partition_models(&self, partition_id: u32) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .by_partition
            .get(&partition_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The partitioner this scheduler drives.
    pub fn partitioner(&self) -> &Arc<Partitioner> {
        &self.partitioner
    }

    /// Consistency checker: partitioner invariants plus instance/partition
    /// cross-references. Empty result means consistent.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.partitioner.validate();
        let state = self.state.lock().unwrap();
        for (model_id, instance) in &state.instances {
            match self.partitioner.partition(instance.partition_id) {
                None => errors.push(format!(
                    "model {} assigned to missing partition {}",
                    model_id, instance.partition_id
                )),
                Some(partition) => {
                    if !partition.residents.iter().any(|m| m == model_id) {
                        errors.push(format!(
                            "model {} not resident on partition {}",
                            model_id, instance.partition_id
                        ));
                    }
                }
            }
        }
        errors
    }
}
