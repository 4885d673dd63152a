//! The positional args contract shared with the inference workers.
//!
//! A generation request crosses the language boundary as a fixed-length
//! JSON array tagged with [`ARGS_CONTRACT_VERSION`]. The index layout is
//! pinned; any change to a position or its meaning requires bumping the
//! version and regenerating the golden fixtures on both sides.
//!
//! [`build_args`] never fails: absent or mistyped request fields get
//! their typed defaults. [`validate_args`] is the shared gate run before
//! anything is handed to a worker.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::flags;

/// Pinned length of the positional args vector.
pub const EXPECTED_ARGS_LENGTH: usize = 152;

/// Version of the positional contract carried next to every vector.
pub const ARGS_CONTRACT_VERSION: u32 = 1;

/// Index constants shared by the builder and the validator.
pub mod index {
    pub const GRID: usize = 0;
    pub const PROMPT: usize = 1;
    pub const NEGATIVE_PROMPT: usize = 2;
    pub const STYLES: usize = 3;
    pub const PERFORMANCE: usize = 4;
    pub const ASPECT_RATIO: usize = 5;
    pub const IMAGE_NUMBER: usize = 6;
    pub const OUTPUT_FORMAT: usize = 7;
    pub const SEED: usize = 8;
    pub const SEED_RANDOM: usize = 9;
    pub const SHARPNESS: usize = 10;
    pub const GUIDANCE_SCALE: usize = 11;
    pub const BASE_MODEL: usize = 12;
    pub const REFINER_MODEL: usize = 13;
    pub const REFINER_SWITCH: usize = 14;
    /// First of [`super::flags::DEFAULT_LORA_COUNT`] `(enabled, name, weight)` triples.
    pub const LORAS_START: usize = 15;

    /// Positions that must hold booleans.
    pub const BOOL_POSITIONS: &[usize] = &[GRID, SEED_RANDOM];
    /// Positions that must hold strings.
    pub const STRING_POSITIONS: &[usize] = &[
        PROMPT,
        NEGATIVE_PROMPT,
        PERFORMANCE,
        ASPECT_RATIO,
        OUTPUT_FORMAT,
        BASE_MODEL,
        REFINER_MODEL,
    ];
    /// Positions that must hold finite numbers.
    pub const NUMBER_POSITIONS: &[usize] = &[
        IMAGE_NUMBER,
        SEED,
        SHARPNESS,
        GUIDANCE_SCALE,
        REFINER_SWITCH,
    ];
}

/// Number of ControlNet image blocks (4 slots each).
const CONTROLNET_IMAGE_COUNT: usize = 4;

/// Number of enhance tabs (16 slots each).
const ENHANCE_TAB_COUNT: usize = 3;

// ---------------------------------------------------------------------------
// Request model
// ---------------------------------------------------------------------------

/// A LoRA slot as sent on the wire: `[enabled, name, weight]`.
pub type LoraSelection = (bool, String, f64);

/// Structured generation request after defaulting.
///
/// Field names match the HTTP request body. Construct with
/// [`GenerateParams::from_request`] to get the per-field fallback
/// behavior (absent *or wrong-typed* value -> typed default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub style_selections: Vec<String>,
    pub performance_selection: String,
    pub aspect_ratios_selection: String,
    pub image_number: u32,
    pub output_format: String,
    pub image_seed: i64,
    pub seed_random: bool,
    pub image_sharpness: f64,
    pub guidance_scale: f64,
    pub base_model_name: String,
    pub refiner_model_name: String,
    pub refiner_switch: f64,
    pub sampler_name: String,
    pub scheduler_name: String,
    pub vae_name: String,
    pub clip_skip: u32,
    pub loras: Vec<LoraSelection>,
    pub adaptive_cfg: f64,
    pub overwrite_step: i64,
    pub overwrite_switch: i64,
    pub overwrite_width: i64,
    pub overwrite_height: i64,
    pub disable_seed_increment: bool,
    pub adm_scaler_positive: f64,
    pub adm_scaler_negative: f64,
    pub adm_scaler_end: f64,
    pub refiner_swap_method: String,
    pub controlnet_softness: f64,
    pub freeu_enabled: bool,
    pub freeu_b1: f64,
    pub freeu_b2: f64,
    pub freeu_s1: f64,
    pub freeu_s2: f64,
    pub save_metadata_to_images: bool,
    pub metadata_scheme: String,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            style_selections: flags::DEFAULT_STYLES.iter().map(|s| s.to_string()).collect(),
            performance_selection: flags::DEFAULT_PERFORMANCE.to_string(),
            aspect_ratios_selection: flags::DEFAULT_ASPECT_RATIO.to_string(),
            image_number: 1,
            output_format: flags::DEFAULT_OUTPUT_FORMAT.to_string(),
            image_seed: -1,
            seed_random: true,
            image_sharpness: 2.0,
            guidance_scale: 4.0,
            base_model_name: "juggernautXL_v8Rundiffusion.safetensors".to_string(),
            refiner_model_name: "None".to_string(),
            refiner_switch: 0.5,
            sampler_name: flags::DEFAULT_SAMPLER.to_string(),
            scheduler_name: flags::DEFAULT_SCHEDULER.to_string(),
            vae_name: "Default (model)".to_string(),
            clip_skip: 2,
            loras: Vec::new(),
            adaptive_cfg: 7.0,
            overwrite_step: -1,
            overwrite_switch: -1,
            overwrite_width: -1,
            overwrite_height: -1,
            disable_seed_increment: false,
            adm_scaler_positive: 1.5,
            adm_scaler_negative: 0.8,
            adm_scaler_end: 0.3,
            refiner_swap_method: flags::DEFAULT_REFINER_SWAP_METHOD.to_string(),
            controlnet_softness: 0.25,
            freeu_enabled: false,
            freeu_b1: 1.1,
            freeu_b2: 1.2,
            freeu_s1: 0.9,
            freeu_s2: 0.2,
            save_metadata_to_images: true,
            metadata_scheme: flags::DEFAULT_METADATA_SCHEME.to_string(),
        }
    }
}

/// Pull `key` out of a JSON object, falling back to `default` when the
/// key is absent or its value does not deserialize as `T`.
fn field<T: serde::de::DeserializeOwned>(body: &Value, key: &str, default: T) -> T {
    body.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(default)
}

impl GenerateParams {
    /// Build params from a raw request body.
    ///
    /// Never fails: every field has a typed default that also covers
    /// wrong-typed values. Closed-set strings (refiner swap method,
    /// metadata scheme) additionally fall back to their default when the
    /// value is not in the set.
    pub fn from_request(body: &Value) -> Self {
        let d = Self::default();

        let mut refiner_swap_method: String =
            field(body, "refiner_swap_method", d.refiner_swap_method.clone());
        if flags::validate_refiner_swap_method(&refiner_swap_method).is_err() {
            refiner_swap_method = flags::DEFAULT_REFINER_SWAP_METHOD.to_string();
        }

        let mut metadata_scheme: String =
            field(body, "metadata_scheme", d.metadata_scheme.clone());
        if flags::validate_metadata_scheme(&metadata_scheme).is_err() {
            metadata_scheme = flags::DEFAULT_METADATA_SCHEME.to_string();
        }

        let image_number: u32 = field(body, "image_number", d.image_number);

        Self {
            prompt: field(body, "prompt", d.prompt),
            negative_prompt: field(body, "negative_prompt", d.negative_prompt),
            style_selections: field(body, "style_selections", d.style_selections),
            performance_selection: field(body, "performance_selection", d.performance_selection),
            aspect_ratios_selection: field(
                body,
                "aspect_ratios_selection",
                d.aspect_ratios_selection,
            ),
            image_number: image_number.max(1),
            output_format: field(body, "output_format", d.output_format),
            image_seed: field(body, "image_seed", d.image_seed),
            seed_random: field(body, "seed_random", d.seed_random),
            image_sharpness: field(body, "image_sharpness", d.image_sharpness),
            guidance_scale: field(body, "guidance_scale", d.guidance_scale),
            base_model_name: field(body, "base_model_name", d.base_model_name),
            refiner_model_name: field(body, "refiner_model_name", d.refiner_model_name),
            refiner_switch: field(body, "refiner_switch", d.refiner_switch),
            sampler_name: field(body, "sampler_name", d.sampler_name),
            scheduler_name: field(body, "scheduler_name", d.scheduler_name),
            vae_name: field(body, "vae_name", d.vae_name),
            clip_skip: field(body, "clip_skip", d.clip_skip),
            loras: field(body, "loras", d.loras),
            adaptive_cfg: field(body, "adaptive_cfg", d.adaptive_cfg),
            overwrite_step: field(body, "overwrite_step", d.overwrite_step),
            overwrite_switch: field(body, "overwrite_switch", d.overwrite_switch),
            overwrite_width: field(body, "overwrite_width", d.overwrite_width),
            overwrite_height: field(body, "overwrite_height", d.overwrite_height),
            disable_seed_increment: field(
                body,
                "disable_seed_increment",
                d.disable_seed_increment,
            ),
            adm_scaler_positive: field(body, "adm_scaler_positive", d.adm_scaler_positive),
            adm_scaler_negative: field(body, "adm_scaler_negative", d.adm_scaler_negative),
            adm_scaler_end: field(body, "adm_scaler_end", d.adm_scaler_end),
            refiner_swap_method,
            controlnet_softness: field(body, "controlnet_softness", d.controlnet_softness),
            freeu_enabled: field(body, "freeu_enabled", d.freeu_enabled),
            freeu_b1: field(body, "freeu_b1", d.freeu_b1),
            freeu_b2: field(body, "freeu_b2", d.freeu_b2),
            freeu_s1: field(body, "freeu_s1", d.freeu_s1),
            freeu_s2: field(body, "freeu_s2", d.freeu_s2),
            save_metadata_to_images: field(
                body,
                "save_metadata_to_images",
                d.save_metadata_to_images,
            ),
            metadata_scheme,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build the positional args vector for one generation request.
///
/// The vector is always exactly [`EXPECTED_ARGS_LENGTH`] entries long and
/// always passes [`validate_args`].
pub fn build_args(params: &GenerateParams) -> Vec<Value> {
    let mut args = Vec::with_capacity(EXPECTED_ARGS_LENGTH);

    // Head block: indices 0..=14.
    args.push(json!(false)); // generate_image_grid
    args.push(json!(params.prompt));
    args.push(json!(params.negative_prompt));
    args.push(json!(params.style_selections));
    args.push(json!(params.performance_selection));
    args.push(json!(flags::normalize_aspect_ratio(
        &params.aspect_ratios_selection
    )));
    args.push(json!(params.image_number));
    args.push(json!(params.output_format));
    args.push(json!(params.image_seed));
    args.push(json!(params.seed_random));
    args.push(json!(params.image_sharpness));
    args.push(json!(params.guidance_scale));
    args.push(json!(params.base_model_name));
    args.push(json!(params.refiner_model_name));
    args.push(json!(params.refiner_switch));

    // LoRA slots, padded/truncated to the fixed count.
    for i in 0..flags::DEFAULT_LORA_COUNT {
        match params.loras.get(i) {
            Some((enabled, name, weight)) => {
                args.push(json!(enabled));
                args.push(json!(name));
                args.push(json!(weight));
            }
            None => {
                args.push(json!(false));
                args.push(json!("None"));
                args.push(json!(1.0));
            }
        }
    }

    // Advanced block: indices 30..=79.
    args.push(json!(false)); // input_image_checkbox
    args.push(json!("uov")); // current_tab
    args.push(json!("Disabled")); // uov_method
    args.push(Value::Null); // uov_input_image
    args.push(Value::Array(Vec::new())); // outpaint_selections
    args.push(Value::Null); // inpaint_input_image
    args.push(json!("")); // inpaint_additional_prompt
    args.push(Value::Null); // inpaint_mask_image_upload
    args.push(json!(false)); // disable_preview
    args.push(json!(false)); // disable_intermediate_results
    args.push(json!(params.disable_seed_increment));
    args.push(json!(false)); // black_out_nsfw
    args.push(json!(params.adm_scaler_positive));
    args.push(json!(params.adm_scaler_negative));
    args.push(json!(params.adm_scaler_end));
    args.push(json!(params.adaptive_cfg));
    args.push(json!(params.clip_skip));
    args.push(json!(params.sampler_name));
    args.push(json!(params.scheduler_name));
    args.push(json!(params.vae_name));
    args.push(json!(params.overwrite_step));
    args.push(json!(params.overwrite_switch));
    args.push(json!(params.overwrite_width));
    args.push(json!(params.overwrite_height));
    args.push(json!(-1)); // overwrite_vary_strength
    args.push(json!(-1)); // overwrite_upscale_strength
    args.push(json!(false)); // mixing_image_prompt_and_vary_upscale
    args.push(json!(false)); // mixing_image_prompt_and_inpaint
    args.push(json!(false)); // debugging_cn_preprocessor
    args.push(json!(false)); // skipping_cn_preprocessor
    args.push(json!(64)); // canny_low_threshold
    args.push(json!(128)); // canny_high_threshold
    args.push(json!(params.refiner_swap_method));
    args.push(json!(params.controlnet_softness));
    args.push(json!(params.freeu_enabled));
    args.push(json!(params.freeu_b1));
    args.push(json!(params.freeu_b2));
    args.push(json!(params.freeu_s1));
    args.push(json!(params.freeu_s2));
    args.push(json!(false)); // debugging_inpaint_preprocessor
    args.push(json!(false)); // inpaint_disable_initial_latent
    args.push(json!("None")); // inpaint_engine
    args.push(json!(1.0)); // inpaint_strength
    args.push(json!(0.0)); // inpaint_respective_field
    args.push(json!(false)); // inpaint_advanced_masking_checkbox
    args.push(json!(false)); // invert_mask_checkbox
    args.push(json!(0)); // inpaint_erode_or_dilate
    args.push(json!(false)); // save_final_enhanced_image_only
    args.push(json!(params.save_metadata_to_images));
    args.push(json!(params.metadata_scheme));

    // ControlNet image blocks: indices 80..=95.
    for _ in 0..CONTROLNET_IMAGE_COUNT {
        args.push(Value::Null); // image
        args.push(json!(1.0)); // weight
        args.push(json!(1.0)); // stop
        args.push(json!("ImagePrompt")); // type
    }

    // Enhancement control block: indices 96..=103.
    args.push(json!(false)); // debugging_dino
    args.push(json!(0)); // dino_erode_or_dilate
    args.push(json!(false)); // debugging_enhance_masks
    args.push(Value::Null); // enhance_input_image
    args.push(json!(false)); // enhance_checkbox
    args.push(json!("Disabled")); // enhance_uov_method
    args.push(json!("Before First Enhancement")); // enhance_uov_processing_order
    args.push(json!("Original Prompts")); // enhance_uov_prompt_type

    // Enhance tabs: indices 104..=151.
    for _ in 0..ENHANCE_TAB_COUNT {
        args.push(json!(false)); // enhance_enabled
        args.push(json!("")); // enhance_mask_dino_prompt
        args.push(json!("")); // enhance_prompt
        args.push(json!("")); // enhance_negative_prompt
        args.push(json!("None")); // enhance_mask_model
        args.push(json!("None")); // enhance_mask_cloth_category
        args.push(json!("None")); // enhance_mask_sam_model
        args.push(json!(0.3)); // enhance_mask_text_threshold
        args.push(json!(0.25)); // enhance_mask_box_threshold
        args.push(json!(0)); // enhance_mask_sam_max_detections
        args.push(json!(false)); // enhance_inpaint_disable_initial_latent
        args.push(json!("None")); // enhance_inpaint_engine
        args.push(json!(1.0)); // enhance_inpaint_strength
        args.push(json!(0.618)); // enhance_inpaint_respective_field
        args.push(json!(0)); // enhance_inpaint_erode_or_dilate
        args.push(json!(false)); // enhance_mask_invert
    }

    debug_assert_eq!(args.len(), EXPECTED_ARGS_LENGTH);
    args
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validate a positional args vector against the pinned contract.
///
/// Checks length first, then the typed positions. Returns the first
/// failure. Runs on both sides of the wire: before dispatching to a
/// worker and inside the worker before enqueueing.
pub fn validate_args(args: &[Value]) -> Result<(), CoreError> {
    if args.len() != EXPECTED_ARGS_LENGTH {
        return Err(CoreError::Validation(format!(
            "Args vector has length {}, expected {EXPECTED_ARGS_LENGTH}",
            args.len()
        )));
    }

    for &i in index::BOOL_POSITIONS {
        if !args[i].is_boolean() {
            return Err(CoreError::Validation(format!(
                "Args position {i} must be a boolean, got {}",
                json_type_name(&args[i])
            )));
        }
    }

    for &i in index::STRING_POSITIONS {
        if !args[i].is_string() {
            return Err(CoreError::Validation(format!(
                "Args position {i} must be a string, got {}",
                json_type_name(&args[i])
            )));
        }
    }

    match args[index::STYLES].as_array() {
        Some(styles) if styles.iter().all(Value::is_string) => {}
        _ => {
            return Err(CoreError::Validation(format!(
                "Args position {} must be an array of strings",
                index::STYLES
            )));
        }
    }

    for &i in index::NUMBER_POSITIONS {
        let finite = args[i].as_f64().is_some_and(f64::is_finite);
        if !finite {
            return Err(CoreError::Validation(format!(
                "Args position {i} must be a finite number, got {}",
                json_type_name(&args[i])
            )));
        }
    }

    Ok(())
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
