//! Configuration constants and file loading.
//!
//! Configuration sources (in order of precedence):
//! 1. Project-level config: `./.neurallog/config.toml`
//! 2. User-level config: `~/.neurallog/config.toml`
//! 3. Built-in defaults
//!
//! Only routing data lives here (tenant id and endpoint overrides);
//! secrets never touch the config file. An unreadable or malformed file
//! is skipped with a warning rather than failing the session.

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::Deserialize;
use tracing::{debug, warn};

/// Default registry endpoint used when no override is configured.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.neurallog.app";

/// Project-level config directory name.
pub const PROJECT_CONFIG_DIR: &str = ".neurallog";

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// TOML configuration file structure.
#[derive(Debug, Default, Deserialize)]
pub struct NeuralLogConfig {
    /// Tenant to bootstrap against.
    pub tenant_id: Option<String>,

    /// Registry endpoint override.
    pub registry_url: Option<String>,

    /// Auth service override; normally discovered via the registry.
    pub auth_url: Option<String>,

    /// Log storage override; normally discovered via the registry.
    pub server_url: Option<String>,
}

impl NeuralLogConfig {
    /// The registry endpoint to use, falling back to the default.
    pub fn registry_url(&self) -> &str {
        self.registry_url.as_deref().unwrap_or(DEFAULT_REGISTRY_URL)
    }
}

/// Loads configuration, taking the first readable candidate file.
pub fn load_config() -> NeuralLogConfig {
    let candidates = [project_config_path(), user_config_path()];
    for path in candidates.into_iter().flatten() {
        if let Some(config) = read_config(&path) {
            debug!(path = %path.display(), "Loaded config file");
            return config;
        }
    }

    debug!("No config file found, using defaults");
    NeuralLogConfig::default()
}

/// Reads and parses one candidate, warning (not failing) on problems.
fn read_config(path: &Path) -> Option<NeuralLogConfig> {
    if !path.exists() {
        return None;
    }
    fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|contents| toml::from_str(&contents).map_err(|e| e.to_string()))
        .map_err(|e| warn!(path = %path.display(), error = %e, "Skipping unusable config file"))
        .ok()
}

/// Returns the project-level config path (./.neurallog/config.toml).
pub fn project_config_path() -> Option<PathBuf> {
    config_path_under(env::current_dir().ok()?)
}

/// Returns the user-level config path (~/.neurallog/config.toml).
pub fn user_config_path() -> Option<PathBuf> {
    config_path_under(dirs::home_dir()?)
}

fn config_path_under(base: PathBuf) -> Option<PathBuf> {
    Some(base.join(PROJECT_CONFIG_DIR).join(CONFIG_FILE_NAME))
}
