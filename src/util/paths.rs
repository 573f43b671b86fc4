use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::RwLock;

// Process-wide config directory override (for --config flag and tests)
static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Environment variable naming an alternative config directory
pub const CONFIG_DIR_ENV: &str = "RECQ_CONFIG_DIR";

pub fn set_config_dir_override(path: Option<PathBuf>) {
    let mut override_path = CONFIG_DIR_OVERRIDE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *override_path = path;
}

pub fn get_config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Find config directory by searching in priority order:
/// 1. Override from --config flag or set_config_dir_override()
/// 2. Environment variable RECQ_CONFIG_DIR
/// 3. User config directory (`~/.config/recq/` on Unix, `%APPDATA%\recq\` on Windows)
/// 4. Current working directory (`./config/`)
///
/// The override is trusted even if it does not exist yet, so `config init`
/// can create it. Otherwise, if nothing is found, the user config directory
/// is created.
pub fn find_config_directory() -> Result<PathBuf> {
    if let Some(override_path) = get_config_dir_override() {
        tracing::debug!("Using config directory override: {:?}", override_path);
        return Ok(override_path);
    }

    if let Ok(env_path) = std::env::var(CONFIG_DIR_ENV) {
        let env_config = PathBuf::from(env_path);
        if env_config.exists() {
            tracing::debug!("Found config directory from {}: {:?}", CONFIG_DIR_ENV, env_config);
            return Ok(env_config);
        }
        tracing::warn!("{} points to a missing directory: {:?}", CONFIG_DIR_ENV, env_config);
    }

    if let Ok(user_config) = get_user_config_dir() {
        if user_config.exists() {
            return Ok(user_config);
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let cwd_config = cwd.join("config");
        if cwd_config.exists() {
            tracing::debug!("Found config directory at: {:?}", cwd_config);
            return Ok(cwd_config);
        }
    }

    let user_config = get_user_config_dir()?;
    std::fs::create_dir_all(&user_config).context("Failed to create user config directory")?;
    tracing::info!("Created config directory at: {:?}", user_config);
    Ok(user_config)
}

/// Platform config directory joined with `recq`
fn get_user_config_dir() -> Result<PathBuf> {
    let base_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine user config directory"))?;
    Ok(base_dir.join("recq"))
}

/// Absolute path to settings.toml
pub fn get_app_config_path() -> Result<PathBuf> {
    Ok(find_config_directory()?.join("settings.toml"))
}

/// Directory holding the rolling JSON log files
pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(find_config_directory()?.join(".logs"))
}

/// Default target for saved files: the platform Downloads folder, else `./Downloads`.
pub fn resolve_default_download_directory() -> PathBuf {
    if let Some(downloads) = dirs::download_dir() {
        return downloads;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join("Downloads"),
        Err(_) => PathBuf::from("Downloads"),
    }
}
