//! Configuration file handling for ~/.datastager/config.ini.
//!
//! Loads and saves user configuration with sensible defaults. Settings
//! structs live in [`super::settings`], constants in [`super::defaults`].

use super::settings::ConfigFile;
use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}'")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.datastager/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults. Keys missing from the
    /// file keep their default values.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("cache")) {
            if let Some(v) = section.get("root") {
                config.cache.root = PathBuf::from(v);
            }
            if let Some(v) = section.get("max_capacity_bytes") {
                config.cache.max_capacity_bytes = parse(v, "cache", "max_capacity_bytes")?;
            }
            if let Some(v) = section.get("unlock_horizon_secs") {
                config.cache.unlock_horizon_secs = parse(v, "cache", "unlock_horizon_secs")?;
            }
            if let Some(v) = section.get("eviction_page_size") {
                config.cache.eviction_page_size = parse(v, "cache", "eviction_page_size")?;
            }
            if let Some(v) = section.get("max_download_attempts") {
                config.cache.max_download_attempts = parse(v, "cache", "max_download_attempts")?;
            }
        }

        if let Some(section) = ini.section(Some("orchestrator")) {
            if let Some(v) = section.get("poll_interval_secs") {
                config.orchestrator.poll_interval_secs =
                    parse(v, "orchestrator", "poll_interval_secs")?;
            }
            if let Some(v) = section.get("page_size") {
                config.orchestrator.page_size = parse(v, "orchestrator", "page_size")?;
            }
        }

        if let Some(section) = ini.section(Some("pipeline")) {
            if let Some(v) = section.get("poll_interval_ms") {
                config.pipeline.poll_interval_ms = parse(v, "pipeline", "poll_interval_ms")?;
            }
            if let Some(v) = section.get("page_size") {
                config.pipeline.page_size = parse(v, "pipeline", "page_size")?;
            }
        }

        if let Some(section) = ini.section(Some("scheduler")) {
            if let Some(v) = section.get("category_size_threshold") {
                config.scheduler.category_size_threshold =
                    parse(v, "scheduler", "category_size_threshold")?;
            }
            if let Some(v) = section.get("category_a_slots") {
                config.scheduler.category_a_slots = parse(v, "scheduler", "category_a_slots")?;
            }
            if let Some(v) = section.get("category_b_slots") {
                config.scheduler.category_b_slots = parse(v, "scheduler", "category_b_slots")?;
            }
            if let Some(v) = section.get("expiry_horizon_secs") {
                config.scheduler.expiry_horizon_secs =
                    parse(v, "scheduler", "expiry_horizon_secs")?;
            }
            if let Some(v) = section.get("snapshot_path") {
                config.scheduler.snapshot_path = PathBuf::from(v);
            }
        }

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let mut ini = Ini::new();
        ini.with_section(Some("cache"))
            .set("root", self.cache.root.display().to_string())
            .set(
                "max_capacity_bytes",
                self.cache.max_capacity_bytes.to_string(),
            )
            .set(
                "unlock_horizon_secs",
                self.cache.unlock_horizon_secs.to_string(),
            )
            .set(
                "eviction_page_size",
                self.cache.eviction_page_size.to_string(),
            )
            .set(
                "max_download_attempts",
                self.cache.max_download_attempts.to_string(),
            );
        ini.with_section(Some("orchestrator"))
            .set(
                "poll_interval_secs",
                self.orchestrator.poll_interval_secs.to_string(),
            )
            .set("page_size", self.orchestrator.page_size.to_string());
        ini.with_section(Some("pipeline"))
            .set(
                "poll_interval_ms",
                self.pipeline.poll_interval_ms.to_string(),
            )
            .set("page_size", self.pipeline.page_size.to_string());
        ini.with_section(Some("scheduler"))
            .set(
                "category_size_threshold",
                self.scheduler.category_size_threshold.to_string(),
            )
            .set(
                "category_a_slots",
                self.scheduler.category_a_slots.to_string(),
            )
            .set(
                "category_b_slots",
                self.scheduler.category_b_slots.to_string(),
            )
            .set(
                "expiry_horizon_secs",
                self.scheduler.expiry_horizon_secs.to_string(),
            )
            .set(
                "snapshot_path",
                self.scheduler.snapshot_path.display().to_string(),
            );

        ini.write_to_file(path)
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }
}

fn parse<T: std::str::FromStr>(
    value: &str,
    section: &str,
    key: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Get the path to the config directory (~/.datastager).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".datastager")
}

/// Get the path to the config file (~/.datastager/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
