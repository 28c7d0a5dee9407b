//! Initialize the configuration directory: create ~/.parley, a default config, and the data directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the storage directory used in local mode.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (cfg, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let data = config::resolve_storage_dir(&cfg, config_path);
    if !data.exists() {
        std::fs::create_dir_all(&data)
            .with_context(|| format!("creating data directory {}", data.display()))?;
        log::info!("created data directory at {}", data.display());
    } else {
        log::debug!("data directory already exists at {}, skipping", data.display());
    }

    Ok(config_dir.to_path_buf())
}
