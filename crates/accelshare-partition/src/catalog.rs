//! Static device catalog and model memory estimation.
//!
//! The catalog holds device classes (total memory, compute units, supported
//! partition modes) and per-model memory requirements per precision. It does
//! no I/O after construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controller::{ComputeMode, MemoryMode};

/// One gibibyte in bytes.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Fallback memory estimate for models the catalog knows nothing about.
pub const FALLBACK_MODEL_BYTES: u64 = 40 * GIB;

/// Overhead factor applied to parameter-derived estimates (KV cache,
/// activations, runtime buffers).
const PARAM_ESTIMATE_OVERHEAD: f64 = 1.2;

/// Numeric format of model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 16-bit IEEE float.
    Fp16,
    /// 16-bit brain float.
    Bf16,
    /// 8-bit integer quantization.
    Int8,
    /// 4-bit integer quantization.
    Int4,
}

impl Precision {
    /// Bytes per parameter at this precision.
    pub fn bytes_per_param(&self) -> f64 {
        match self {
            Precision::Fp16 | Precision::Bf16 => 2.0,
            Precision::Int8 => 1.0,
            Precision::Int4 => 0.5,
        }
    }

    /// Ratio to the fp16 footprint, used to derive quantized sizes from a
    /// baseline table entry.
    pub fn fp16_ratio(&self) -> f64 {
        match self {
            Precision::Fp16 | Precision::Bf16 => 1.0,
            Precision::Int8 => 0.60,
            Precision::Int4 => 0.40,
        }
    }

    /// Lowercase name, matching the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Fp16 => "fp16",
            Precision::Bf16 => "bf16",
            Precision::Int8 => "int8",
            Precision::Int4 => "int4",
        }
    }

    /// Parses a lowercase precision name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fp16" => Some(Precision::Fp16),
            "bf16" => Some(Precision::Bf16),
            "int8" => Some(Precision::Int8),
            "int4" => Some(Precision::Int4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static specification of a device class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Device class identifier (e.g. "MI300X").
    pub name: String,
    /// Total device memory in bytes.
    pub total_memory_bytes: u64,
    /// Total compute units.
    pub compute_units: u32,
    /// Sub-device count exposed in compute-partitioned mode.
    pub sub_device_count: u32,
    /// Supported compute partition modes.
    pub compute_modes: Vec<ComputeMode>,
    /// Supported memory partition modes.
    pub memory_modes: Vec<MemoryMode>,
}

/// Per-model memory requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSizeEntry {
    /// Parameter count label (e.g. "8B").
    pub parameters: String,
    /// Required memory per precision, in bytes. An fp16 entry acts as the
    /// baseline for deriving missing quantized precisions.
    pub precision_memory: HashMap<Precision, u64>,
}

impl ModelSizeEntry {
    /// Entry with only an fp16 baseline.
    pub fn fp16(parameters: &str, fp16_bytes: u64) -> Self {
        let mut precision_memory = HashMap::new();
        precision_memory.insert(Precision::Fp16, fp16_bytes);
        Self {
            parameters: parameters.to_string(),
            precision_memory,
        }
    }

    /// Entry with explicit fp16/int8/int4 sizes.
    pub fn quantized(parameters: &str, fp16: u64, int8: u64, int4: u64) -> Self {
        let mut precision_memory = HashMap::new();
        precision_memory.insert(Precision::Fp16, fp16);
        precision_memory.insert(Precision::Int8, int8);
        precision_memory.insert(Precision::Int4, int4);
        Self {
            parameters: parameters.to_string(),
            precision_memory,
        }
    }
}

/// Static catalog of device classes and model sizes.
pub struct DeviceCatalog {
    devices: HashMap<String, DeviceSpec>,
    models: HashMap<String, ModelSizeEntry>,
}

impl DeviceCatalog {
    /// Catalog with the built-in device classes and model size table.
    pub fn builtin() -> Self {
        let mut devices = HashMap::new();
        devices.insert(
            "MI300X".to_string(),
            DeviceSpec {
                name: "MI300X".to_string(),
                total_memory_bytes: 192 * GIB,
                compute_units: 304,
                sub_device_count: 8,
                compute_modes: vec![ComputeMode::Single, ComputeMode::Cpx],
                memory_modes: vec![MemoryMode::Uniform, MemoryMode::Quadrant],
            },
        );
        devices.insert(
            "MI300A".to_string(),
            DeviceSpec {
                name: "MI300A".to_string(),
                total_memory_bytes: 128 * GIB,
                compute_units: 228,
                sub_device_count: 6,
                compute_modes: vec![ComputeMode::Single, ComputeMode::Cpx],
                memory_modes: vec![MemoryMode::Uniform],
            },
        );

        let mut models = HashMap::new();
        models.insert(
            "meta-llama/Llama-3.1-8B-Instruct".to_string(),
            ModelSizeEntry::quantized("8B", 20 * GIB, 13 * GIB, 9 * GIB),
        );
        models.insert(
            "meta-llama/Llama-3.3-70B-Instruct".to_string(),
            ModelSizeEntry::quantized("70B", 165 * GIB, 99 * GIB, 66 * GIB),
        );
        models.insert(
            "mistralai/Mistral-7B-Instruct-v0.2".to_string(),
            ModelSizeEntry::fp16("7B", 14 * GIB),
        );
        models.insert(
            "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
            ModelSizeEntry::fp16("47B", 100 * GIB),
        );
        models.insert(
            "Qwen/Qwen2.5-1.5B-Instruct".to_string(),
            ModelSizeEntry::fp16("1.5B", 4 * GIB),
        );
        models.insert(
            "google/gemma-2-9b-it".to_string(),
            ModelSizeEntry::fp16("9B", 22 * GIB),
        );

        Self { devices, models }
    }

    /// Empty catalog, for callers supplying their own entries.
    pub fn empty() -> Self {
        Self {
            devices: HashMap::new(),
            models: HashMap::new(),
        }
    }

    /// Adds or replaces a device class.
    pub fn add_device(&mut self, spec: DeviceSpec) {
        self.devices.insert(spec.name.clone(), spec);
    }

    /// Adds or replaces a model size entry.
    pub fn add_model(&mut self, model_id: &str, entry: ModelSizeEntry) {
        self.models.insert(model_id.to_string(), entry);
    }

    /// Looks up a device class by name (case-insensitive on ASCII).
    pub fn lookup_device(&self, name: &str) -> Option<&DeviceSpec> {
        self.devices.get(&name.to_ascii_uppercase()).or_else(|| {
            self.devices
                .values()
                .find(|d| d.name.eq_ignore_ascii_case(name))
        })
    }

    /// Finds the size entry for a model, by exact id or by trailing model
    /// name (so "Llama-3.1-8B-Instruct" matches the org-qualified key).
    pub fn lookup_model(&self, model_id: &str) -> Option<&ModelSizeEntry> {
        if let Some(entry) = self.models.get(model_id) {
            return Some(entry);
        }
        self.models.iter().find_map(|(key, entry)| {
            let short = key.rsplit('/').next().unwrap_or(key);
            if model_id.ends_with(short) {
                Some(entry)
            } else {
                None
            }
        })
    }

    /// Estimates the memory a model needs at a precision, in bytes.
    ///
    /// Policy: an explicit per-precision table entry wins; otherwise an fp16
    /// baseline is scaled by fixed ratios; otherwise a parameter count parsed
    /// from the model id drives `params x bytes_per_param x 1.2`; otherwise a
    /// documented 40 GiB fallback.
    pub fn estimate_model_memory(&self, model_id: &str, precision: Precision) -> u64 {
        if let Some(entry) = self.lookup_model(model_id) {
            if let Some(bytes) = entry.precision_memory.get(&precision) {
                return *bytes;
            }
            if let Some(fp16) = entry.precision_memory.get(&Precision::Fp16) {
                return (*fp16 as f64 * precision.fp16_ratio()) as u64;
            }
        }

        if let Some(params) = parse_parameter_count(model_id) {
            let bytes = params * precision.bytes_per_param() * PARAM_ESTIMATE_OVERHEAD;
            return bytes as u64;
        }

        debug!(model_id, "no size information, using fallback estimate");
        FALLBACK_MODEL_BYTES
    }

    /// Checks whether a model fits a partition of `partition_bytes`, leaving
    /// `overhead_bytes` headroom. Returns an explanation on failure.
    pub fn validate_model_fits(
        &self,
        model_id: &str,
        precision: Precision,
        partition_bytes: u64,
        overhead_bytes: u64,
    ) -> Result<(), String> {
        let required = self.estimate_model_memory(model_id, precision);
        let available = partition_bytes.saturating_sub(overhead_bytes);
        if required > available {
            return Err(format!(
                "model {} requires {} bytes but partition only has {} bytes available",
                model_id, required, available
            ));
        }
        Ok(())
    }
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Parses a parameter count from a model id, looking for a trailing-count
/// token like "8B", "70B", or "1.5B" among the id's segments.
fn parse_parameter_count(model_id: &str) -> Option<f64> {
    // Dots stay inside tokens so "1.5B" parses as a fractional count.
    for token in model_id.split(['/', '-', '_']).rev() {
        if let Some(params) = parse_count_token(token) {
            return Some(params);
        }
    }
    None
}

fn parse_count_token(token: &str) -> Option<f64> {
    let upper = token.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(d) = upper.strip_suffix('B') {
        (d, 1e9)
    } else if let Some(d) = upper.strip_suffix('M') {
        (d, 1e6)
    } else if let Some(d) = upper.strip_suffix('K') {
        (d, 1e3)
    } else {
        return None;
    };
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_device_case_insensitive() {
        let catalog = DeviceCatalog::builtin();
        assert!(catalog.lookup_device("mi300x").is_some());
        assert!(catalog.lookup_device("MI300X").is_some());
        assert!(catalog.lookup_device("H100").is_none());
    }

    #[test]
    fn test_explicit_precision_entry_wins() {
        let catalog = DeviceCatalog::builtin();
        let bytes =
            catalog.estimate_model_memory("meta-llama/Llama-3.1-8B-Instruct", Precision::Int8);
        assert_eq!(bytes, 13 * GIB);
    }

    #[test]
    fn test_fp16_baseline_ratio_derivation() {
        let catalog = DeviceCatalog::builtin();
        let fp16 =
            catalog.estimate_model_memory("mistralai/Mistral-7B-Instruct-v0.2", Precision::Fp16);
        let int8 =
            catalog.estimate_model_memory("mistralai/Mistral-7B-Instruct-v0.2", Precision::Int8);
        let int4 =
            catalog.estimate_model_memory("mistralai/Mistral-7B-Instruct-v0.2", Precision::Int4);
        assert_eq!(fp16, 14 * GIB);
        assert_eq!(int8, (14.0 * 0.60 * GIB as f64) as u64);
        assert_eq!(int4, (14.0 * 0.40 * GIB as f64) as u64);
    }

    #[test]
    fn test_bf16_tracks_fp16() {
        let catalog = DeviceCatalog::builtin();
        let fp16 =
            catalog.estimate_model_memory("mistralai/Mistral-7B-Instruct-v0.2", Precision::Fp16);
        let bf16 =
            catalog.estimate_model_memory("mistralai/Mistral-7B-Instruct-v0.2", Precision::Bf16);
        assert_eq!(fp16, bf16);
    }

    #[test]
    fn test_suffix_match_on_model_name() {
        let catalog = DeviceCatalog::builtin();
        let full =
            catalog.estimate_model_memory("meta-llama/Llama-3.1-8B-Instruct", Precision::Fp16);
        let short = catalog.estimate_model_memory("Llama-3.1-8B-Instruct", Precision::Fp16);
        assert_eq!(full, short);
    }

    #[test]
    fn test_parameter_count_derivation() {
        let catalog = DeviceCatalog::builtin();
        // 13e9 params x 2 bytes x 1.2 overhead
        let bytes = catalog.estimate_model_memory("acme/custom-13B-chat", Precision::Fp16);
        assert_eq!(bytes, (13e9 * 2.0 * 1.2) as u64);
        let int4 = catalog.estimate_model_memory("acme/custom-13B-chat", Precision::Int4);
        assert_eq!(int4, (13e9 * 0.5 * 1.2) as u64);
    }

    #[test]
    fn test_fractional_parameter_suffix() {
        assert_eq!(parse_parameter_count("Qwen2-1.5B"), Some(1.5e9));
        assert_eq!(parse_parameter_count("tiny-350M-base"), Some(350e6));
    }

    #[test]
    fn test_unknown_model_fallback() {
        let catalog = DeviceCatalog::builtin();
        let bytes = catalog.estimate_model_memory("acme/mystery-model", Precision::Fp16);
        assert_eq!(bytes, FALLBACK_MODEL_BYTES);
    }

    #[test]
    fn test_validate_model_fits() {
        let catalog = DeviceCatalog::builtin();
        assert!(catalog
            .validate_model_fits(
                "meta-llama/Llama-3.1-8B-Instruct",
                Precision::Fp16,
                24 * GIB,
                0,
            )
            .is_ok());
        assert!(catalog
            .validate_model_fits(
                "meta-llama/Llama-3.3-70B-Instruct",
                Precision::Fp16,
                24 * GIB,
                0,
            )
            .is_err());
    }
}
