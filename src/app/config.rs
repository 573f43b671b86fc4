use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Complete configuration (saved to config/settings.toml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Where finished files are written
    pub directory: PathBuf,
    /// Maximum number of downloads in flight at once
    pub max_concurrent: usize,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Minimum gap between two progress events of one download
    pub progress_interval_ms: u64,
    /// Stamp saved files with the server's Last-Modified time
    pub preserve_modified_time: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            directory: crate::util::paths::resolve_default_download_directory(),
            max_concurrent: 3,
            user_agent: format!("recq/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 300,
            connect_timeout_secs: 30,
            progress_interval_ms: 250,
            preserve_modified_time: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    ZeroConcurrency,
    EmptyUserAgent,
    UnknownLogLevel(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroConcurrency => {
                write!(f, "download.max_concurrent must be at least 1")
            }
            ValidationError::EmptyUserAgent => write!(f, "download.user_agent must not be empty"),
            ValidationError::UnknownLogLevel(level) => write!(
                f,
                "logging.level '{}' is not one of trace, debug, info, warn, error",
                level
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

impl Config {
    /// Load settings.toml from the resolved config directory, falling back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let path = crate::util::paths::get_app_config_path()?;
        Self::load_from(&path)
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("Config not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;

        config.check()?;
        Ok(config)
    }

    /// Save to settings.toml in the resolved config directory
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = crate::util::paths::get_app_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.check()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;

        // Atomic write using temp file + rename
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content).context("Failed to write temp config file")?;
        std::fs::rename(&temp_path, path).context("Failed to rename temp config file")?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.download.max_concurrent == 0 {
            errors.push(ValidationError::ZeroConcurrency);
        }
        if self.download.user_agent.trim().is_empty() {
            errors.push(ValidationError::EmptyUserAgent);
        }
        if self.log_level().is_none() {
            errors.push(ValidationError::UnknownLogLevel(self.logging.level.clone()));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn check(&self) -> anyhow::Result<()> {
        self.validate().map_err(|errors| {
            anyhow::anyhow!(
                "Invalid configuration: {}",
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    pub fn log_level(&self) -> Option<tracing::Level> {
        self.logging.level.parse().ok()
    }
}
