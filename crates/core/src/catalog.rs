//! Read-only catalogs backing the UI controls.
//!
//! [`build_snapshot`] recomputes everything from disk on each call; the
//! inventory is small and `GET /settings` is only hit at UI startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::flags;

/// File extensions recognised as model weights.
const MODEL_FILE_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "pth", "bin", "patch"];

/// Directories the catalog is assembled from.
#[derive(Debug, Clone)]
pub struct CatalogPaths {
    pub checkpoints: PathBuf,
    pub loras: PathBuf,
    pub vaes: PathBuf,
    pub styles: PathBuf,
    pub presets: PathBuf,
}

/// Payload of `GET /settings`.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub models: Vec<String>,
    pub loras: Vec<String>,
    /// VAE files, with the `"Default (model)"` pseudo-entry first.
    pub vaes: Vec<String>,
    pub presets: Vec<String>,
    pub styles: Vec<String>,
    pub aspect_ratios: Vec<&'static str>,
    pub performance_options: Vec<&'static str>,
    pub samplers: Vec<&'static str>,
    pub schedulers: Vec<&'static str>,
    pub output_formats: Vec<&'static str>,
    pub clip_skip_max: u32,
    pub default_lora_count: usize,
    pub refiner_swap_methods: Vec<&'static str>,
    pub metadata_schemes: Vec<&'static str>,
}

/// Assemble a fresh snapshot from the configured directories.
pub fn build_snapshot(paths: &CatalogPaths) -> CatalogSnapshot {
    let mut vaes = vec!["Default (model)".to_string()];
    vaes.extend(scan_model_dir(&paths.vaes));

    CatalogSnapshot {
        models: scan_model_dir(&paths.checkpoints),
        loras: scan_model_dir(&paths.loras),
        vaes,
        presets: list_presets(&paths.presets),
        styles: load_styles(&paths.styles),
        aspect_ratios: flags::ASPECT_RATIOS.to_vec(),
        performance_options: flags::PERFORMANCE_OPTIONS.to_vec(),
        samplers: flags::SAMPLERS.to_vec(),
        schedulers: flags::SCHEDULERS.to_vec(),
        output_formats: flags::OUTPUT_FORMATS.to_vec(),
        clip_skip_max: flags::CLIP_SKIP_MAX,
        default_lora_count: flags::DEFAULT_LORA_COUNT,
        refiner_swap_methods: flags::REFINER_SWAP_METHODS.to_vec(),
        metadata_schemes: flags::METADATA_SCHEMES.to_vec(),
    }
}

/// Recursively list model files under `dir` as sorted relative paths.
///
/// A missing directory yields an empty list.
pub fn scan_model_dir(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    collect_model_files(dir, dir, &mut files);
    files.sort();
    files
}

fn collect_model_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_model_files(root, &path, out);
            continue;
        }
        let is_model = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| MODEL_FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_model {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

#[derive(Deserialize)]
struct StyleEntry {
    name: String,
}

/// Collect style names from every `*.json` file under `dir`.
///
/// Files that fail to parse are skipped with a warning. The pseudo-styles
/// ("Fooocus V2", "Random Style") are appended if not already present.
pub fn load_styles(dir: &Path) -> Vec<String> {
    let mut styles: Vec<String> = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dir) {
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        for path in files {
            let parsed: Option<Vec<StyleEntry>> = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok());
            match parsed {
                Some(entries) => {
                    styles.extend(entries.into_iter().map(|s| s.name));
                }
                None => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable style file");
                }
            }
        }
    }

    for pseudo in flags::PSEUDO_STYLES {
        if !styles.iter().any(|s| s == pseudo) {
            styles.push(pseudo.to_string());
        }
    }

    styles
}

/// List preset names: the stems of `*.json` files under `dir`, sorted.
pub fn list_presets(dir: &Path) -> Vec<String> {
    let mut presets: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    };
    presets.sort();
    presets
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
