//! NVML-based GPU enumeration.
//!
//! NVML initialisation is gracefully optional: hosts without NVIDIA
//! drivers (developer laptops, CI) report zero GPUs instead of
//! panicking.

use nvml_wrapper::Nvml;

/// Bytes of VRAM per scheduling weight point.
const BYTES_PER_WEIGHT: u64 = 4 * 1024 * 1024 * 1024;

/// One GPU visible to NVML.
#[derive(Debug, Clone)]
pub struct DetectedGpu {
    pub index: u32,
    pub name: String,
    pub total_memory_bytes: u64,
}

/// Enumerate the GPUs on this host.
///
/// Returns an empty list when NVML cannot be initialised or a device
/// cannot be queried.
pub fn detect_gpus() -> Vec<DetectedGpu> {
    let nvml = match Nvml::init() {
        Ok(nvml) => nvml,
        Err(e) => {
            tracing::warn!(error = %e, "NVML unavailable, no GPUs auto-detected");
            return Vec::new();
        }
    };

    let count = match nvml.device_count() {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count NVML devices");
            return Vec::new();
        }
    };

    let mut gpus = Vec::with_capacity(count as usize);
    for index in 0..count {
        let device = match nvml.device_by_index(index) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(index, error = %e, "Failed to open NVML device");
                continue;
            }
        };
        let name = device.name().unwrap_or_else(|_| format!("GPU {index}"));
        let total_memory_bytes = device.memory_info().map(|m| m.total).unwrap_or(0);
        gpus.push(DetectedGpu {
            index,
            name,
            total_memory_bytes,
        });
    }

    gpus
}

/// Scheduling weight for a VRAM size: one point per 4 GiB, minimum 1.
pub fn weight_for_memory(total_memory_bytes: u64) -> u32 {
    ((total_memory_bytes / BYTES_PER_WEIGHT) as u32).max(1)
}
