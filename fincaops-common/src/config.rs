//! Configuration file resolution shared across FincaOps services
//!
//! Services resolve their settings with the priority chain:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Locate the TOML config file for a service
///
/// Looks for `~/.config/fincaops/<service>.toml` first, then (on Linux)
/// `/etc/fincaops/<service>.toml`. Returns `None` when neither exists.
pub fn config_file_path(service: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", service);

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("fincaops").join(&file_name)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fincaops").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load and parse a TOML config file into the service's config struct
pub fn load_toml<T: DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// OS-dependent default data directory for FincaOps state
///
/// Databases and attachment storage live here unless configured otherwise.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fincaops"))
        .unwrap_or_else(|| PathBuf::from("./fincaops_data"))
}

/// Resolve a single string setting through the priority chain
///
/// `cli` and `toml_value` are passed as options; the environment variable is
/// read here so every service resolves identically.
pub fn resolve_setting(
    cli: Option<&str>,
    env_var_name: &str,
    toml_value: Option<&str>,
    default: &str,
) -> String {
    if let Some(v) = cli {
        return v.to_string();
    }
    if let Ok(v) = std::env::var(env_var_name) {
        if !v.trim().is_empty() {
            return v;
        }
    }
    if let Some(v) = toml_value {
        return v.to_string();
    }
    default.to_string()
}
