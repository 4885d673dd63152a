use std::path::PathBuf;

use remgo_core::catalog::CatalogPaths;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for running next to a
/// Fooocus checkout. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8888`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`;
    /// `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Generated-image tree, also holding the `metadata.db` sidecar.
    pub outputs_dir: PathBuf,
    /// Model/style/preset directories backing `GET /settings`.
    pub checkpoints_dir: PathBuf,
    pub loras_dir: PathBuf,
    pub vaes_dir: PathBuf,
    pub styles_dir: PathBuf,
    pub presets_dir: PathBuf,
    /// GPU slot table document.
    pub gpu_config_path: PathBuf,
    /// Command line used to launch each worker process.
    pub worker_command: String,
    /// First advisory worker port; slot N gets `base + N`.
    pub worker_base_port: u16,
    /// Flat config document edited via `/config/editor`.
    pub config_doc_path: PathBuf,
    /// Companion tutorial file the editor schema is discovered from.
    pub config_tutorial_path: PathBuf,
    /// Wall-clock cap for a single sub-task, in seconds.
    pub subtask_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                              |
    /// |-------------------------|--------------------------------------|
    /// | `HOST`                  | `0.0.0.0`                            |
    /// | `PORT`                  | `8888`                               |
    /// | `CORS_ORIGINS`          | `*`                                  |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                                 |
    /// | `OUTPUTS_DIR`           | `./outputs`                          |
    /// | `CHECKPOINTS_DIR`       | `./models/checkpoints`               |
    /// | `LORAS_DIR`             | `./models/loras`                     |
    /// | `VAES_DIR`              | `./models/vae`                       |
    /// | `STYLES_DIR`            | `./sdxl_styles`                      |
    /// | `PRESETS_DIR`           | `./presets`                          |
    /// | `GPU_CONFIG_PATH`       | `./gpu_config.json`                  |
    /// | `WORKER_CMD`            | `python python_worker.py`            |
    /// | `WORKER_BASE_PORT`      | `9000`                               |
    /// | `CONFIG_PATH`           | `./config.txt`                       |
    /// | `CONFIG_TUTORIAL_PATH`  | `./config_modification_tutorial.txt` |
    /// | `SUBTASK_TIMEOUT_SECS`  | `1800`                               |
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8888),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 30),
            outputs_dir: env_or("OUTPUTS_DIR", "./outputs").into(),
            checkpoints_dir: env_or("CHECKPOINTS_DIR", "./models/checkpoints").into(),
            loras_dir: env_or("LORAS_DIR", "./models/loras").into(),
            vaes_dir: env_or("VAES_DIR", "./models/vae").into(),
            styles_dir: env_or("STYLES_DIR", "./sdxl_styles").into(),
            presets_dir: env_or("PRESETS_DIR", "./presets").into(),
            gpu_config_path: env_or("GPU_CONFIG_PATH", "./gpu_config.json").into(),
            worker_command: env_or("WORKER_CMD", "python python_worker.py"),
            worker_base_port: env_parse("WORKER_BASE_PORT", 9000),
            config_doc_path: env_or("CONFIG_PATH", "./config.txt").into(),
            config_tutorial_path: env_or(
                "CONFIG_TUTORIAL_PATH",
                "./config_modification_tutorial.txt",
            )
            .into(),
            subtask_timeout_secs: env_parse("SUBTASK_TIMEOUT_SECS", 1800),
        }
    }

    /// The catalog directories as one bundle.
    pub fn catalog_paths(&self) -> CatalogPaths {
        CatalogPaths {
            checkpoints: self.checkpoints_dir.clone(),
            loras: self.loras_dir.clone(),
            vaes: self.vaes_dir.clone(),
            styles: self.styles_dir.clone(),
            presets: self.presets_dir.clone(),
        }
    }

    /// Path of the metadata sidecar inside the outputs directory.
    pub fn metadata_db_path(&self) -> PathBuf {
        self.outputs_dir.join("metadata.db")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid value")),
        Err(_) => default,
    }
}
