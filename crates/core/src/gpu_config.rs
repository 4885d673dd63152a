//! GPU slot configuration.
//!
//! Loaded from a JSON document (`gpu_config.json` by default). When the
//! file is missing or unreadable the table is auto-detected from NVML,
//! with a weight of one point per 4 GiB of VRAM.

use std::path::Path;

use serde::Deserialize;

use crate::hardware;
use crate::types::DeviceId;

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

/// One configured GPU.
#[derive(Debug, Clone, Deserialize)]
pub struct GpuEntry {
    pub device: DeviceId,
    /// Display name; defaults to `GPU {device}` when omitted.
    #[serde(default)]
    pub name: Option<String>,
    /// Relative scheduling weight, clamped to >= 1.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl GpuEntry {
    /// Display name for UI payloads.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("GPU {}", self.device))
    }
}

/// The `gpu_config.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct GpuConfigFile {
    /// Whether multi-GPU scheduling is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Whether a single request may be split across several GPUs.
    #[serde(default = "default_true")]
    pub distribute: bool,
    #[serde(default)]
    pub gpus: Vec<GpuEntry>,
}

impl GpuConfigFile {
    /// Load from `path`, falling back to NVML auto-detection when the
    /// file is absent or does not parse.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Self>(&raw) {
                Ok(config) => {
                    tracing::info!(
                        path = %path.display(),
                        gpu_count = config.gpus.len(),
                        enabled = config.enabled,
                        "Loaded GPU configuration",
                    );
                    config
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Invalid GPU configuration, auto-detecting");
                    Self::auto_detect()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "GPU configuration not found, auto-detecting");
                Self::auto_detect()
            }
        }
    }

    /// Build a configuration from the GPUs visible to NVML.
    ///
    /// Hosts without NVIDIA drivers yield an empty, disabled table.
    pub fn auto_detect() -> Self {
        let gpus: Vec<GpuEntry> = hardware::detect_gpus()
            .into_iter()
            .map(|gpu| GpuEntry {
                device: gpu.index,
                name: Some(gpu.name),
                weight: hardware::weight_for_memory(gpu.total_memory_bytes),
            })
            .collect();

        for gpu in &gpus {
            tracing::info!(
                device = gpu.device,
                name = %gpu.display_name(),
                weight = gpu.weight,
                "Auto-detected GPU",
            );
        }

        Self {
            enabled: !gpus.is_empty(),
            distribute: true,
            gpus,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
