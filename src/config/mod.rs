// src/config/mod.rs

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::SyncConfig;

/// Upper bound for `auto_update_interval_minutes`.
pub const MAX_AUTO_UPDATE_INTERVAL_MINUTES: u64 = 30 * 24 * 60;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub schedule_url: String,
    pub https_only: bool,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub auto_update_interval_minutes: u64,
    pub status_channel_capacity: usize,
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schedule_url: String::new(),
            https_only: false,
            connect_timeout_secs: Some(30),
            request_timeout_secs: None,
            auto_update_interval_minutes: 120,
            status_channel_capacity: 16,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// The subset of settings used by the sync subsystem.
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            https_only: self.https_only,
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            status_channel_capacity: self.status_channel_capacity,
            ..SyncConfig::default()
        }
    }

    /// The configured interval, clamped to one minute up to thirty days.
    pub fn auto_update_interval(&self) -> chrono::Duration {
        let configured = self.auto_update_interval_minutes;
        let minutes = configured.clamp(1, MAX_AUTO_UPDATE_INTERVAL_MINUTES);
        if minutes != configured {
            warn!("Config: auto_update_interval_minutes = {} out of range, using {}", configured, minutes);
        }
        i64::try_from(minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or_else(|| chrono::Duration::minutes(120))
    }

    /// Falls back to `Info` for unknown values.
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("org", "ConfSync", "ConfSync")
        .context("Failed to get project directories")?;
    let config_dir = proj_dirs.config_dir();
    fs::create_dir_all(config_dir)?;
    Ok(config_dir.join("config.toml"))
}

pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if config_path.exists() {
        let mut file = File::open(config_path)
            .with_context(|| format!("Failed to open config file: {}", config_path.display()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        Ok(config)
    } else {
        // Return default config if file doesn't exist
        Ok(AppConfig::default())
    }
}

pub fn save_config(config: &AppConfig, config_path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config)
        .context("Failed to serialize config")?;
    let mut file = File::create(config_path)
        .with_context(|| format!("Failed to create config file: {}", config_path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
    Ok(())
}
