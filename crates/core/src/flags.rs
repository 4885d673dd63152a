//! Closed option sets and UI constants for the generation pipeline.
//!
//! These mirror the vocabularies the inference workers understand. They
//! feed both the catalog payload (`GET /settings`) and the defaults
//! applied by [`crate::args`] when a request omits or mistypes a field.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// Performance presets, in UI order. "Speed" is the default.
pub const PERFORMANCE_OPTIONS: &[&str] = &[
    "Quality",
    "Speed",
    "Extreme Speed",
    "Lightning",
    "Hyper-SD",
];

/// Default performance preset.
pub const DEFAULT_PERFORMANCE: &str = "Speed";

// ---------------------------------------------------------------------------
// Samplers & schedulers
// ---------------------------------------------------------------------------

/// k-diffusion sampler identifiers understood by the worker.
pub const SAMPLERS: &[&str] = &[
    "euler",
    "euler_ancestral",
    "heun",
    "dpm_2",
    "dpm_2_ancestral",
    "lms",
    "dpm_fast",
    "dpm_adaptive",
    "dpmpp_2s_ancestral",
    "dpmpp_sde",
    "dpmpp_sde_gpu",
    "dpmpp_2m",
    "dpmpp_2m_sde",
    "dpmpp_2m_sde_gpu",
    "dpmpp_3m_sde",
    "dpmpp_3m_sde_gpu",
    "ddpm",
    "lcm",
    "tcd",
    "ddim",
    "uni_pc",
    "uni_pc_bh2",
];

/// Default sampler.
pub const DEFAULT_SAMPLER: &str = "dpmpp_2m_sde_gpu";

/// Noise schedule identifiers understood by the worker.
pub const SCHEDULERS: &[&str] = &[
    "normal",
    "karras",
    "exponential",
    "sgm_uniform",
    "simple",
    "ddim_uniform",
    "lcm",
    "turbo",
    "align_your_steps",
    "tcd",
];

/// Default scheduler.
pub const DEFAULT_SCHEDULER: &str = "karras";

// ---------------------------------------------------------------------------
// Aspect ratios
// ---------------------------------------------------------------------------

/// SDXL-native resolutions as `W×H` strings (multiplication sign).
pub const ASPECT_RATIOS: &[&str] = &[
    "704×1408",
    "704×1344",
    "768×1344",
    "768×1280",
    "832×1216",
    "832×1152",
    "896×1152",
    "896×1088",
    "960×1088",
    "960×1024",
    "1024×1024",
    "1024×960",
    "1088×960",
    "1088×896",
    "1152×896",
    "1152×832",
    "1216×832",
    "1280×768",
    "1344×768",
    "1344×704",
    "1408×704",
    "1472×704",
    "1536×640",
    "1600×640",
];

/// Default aspect ratio.
pub const DEFAULT_ASPECT_RATIO: &str = "1152×896";

/// Normalize an aspect-ratio string to the `W×H` wire form.
///
/// Accepts `*`, `x` or `X` as the separator; the worker splits on `×`.
pub fn normalize_aspect_ratio(raw: &str) -> String {
    raw.replace(['*', 'x', 'X'], "×")
}

// ---------------------------------------------------------------------------
// Output & metadata
// ---------------------------------------------------------------------------

/// Supported image output formats.
pub const OUTPUT_FORMATS: &[&str] = &["png", "jpeg", "webp"];

/// Default output format.
pub const DEFAULT_OUTPUT_FORMAT: &str = "png";

/// Refiner swap strategies.
pub const REFINER_SWAP_METHODS: &[&str] = &["joint", "separate", "vae"];

/// Default refiner swap method.
pub const DEFAULT_REFINER_SWAP_METHOD: &str = "joint";

/// Image-metadata embedding schemes.
pub const METADATA_SCHEMES: &[&str] = &["fooocus", "a1111"];

/// Default metadata scheme.
pub const DEFAULT_METADATA_SCHEME: &str = "fooocus";

/// Upper bound for the CLIP-skip control.
pub const CLIP_SKIP_MAX: u32 = 12;

// ---------------------------------------------------------------------------
// Styles & LoRAs
// ---------------------------------------------------------------------------

/// Pseudo-styles that exist in the worker but not as style files on disk.
pub const PSEUDO_STYLES: &[&str] = &["Fooocus V2", "Random Style"];

/// Default style selections applied when a request omits them.
pub const DEFAULT_STYLES: &[&str] = &["Fooocus V2", "Fooocus Enhance", "Fooocus Sharp"];

/// Number of LoRA slots in the positional contract.
pub const DEFAULT_LORA_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Validate that `method` is a known refiner swap method.
pub fn validate_refiner_swap_method(method: &str) -> Result<(), CoreError> {
    if REFINER_SWAP_METHODS.contains(&method) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid refiner swap method '{method}'. Must be one of: {}",
            REFINER_SWAP_METHODS.join(", ")
        )))
    }
}

/// Validate that `scheme` is a known metadata scheme.
pub fn validate_metadata_scheme(scheme: &str) -> Result<(), CoreError> {
    if METADATA_SCHEMES.contains(&scheme) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid metadata scheme '{scheme}'. Must be one of: {}",
            METADATA_SCHEMES.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
