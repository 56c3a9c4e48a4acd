//! Configuration for the Latin trainer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vocab_core::SchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String { "warn".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
            display: DisplayConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = toml::to_string_pretty(self)?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "latin-trainer")
            .map(|d| d.config_dir().join("config.toml"))
    }

    /// The configured database, or `latin.db` in the platform data dir.
    pub fn db_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.storage.database_path {
            return Some(path.clone());
        }
        directories::ProjectDirs::from("", "", "latin-trainer")
            .map(|d| d.data_dir().join("latin.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Whose shelves and due dates are read and written.
    #[serde(default = "default_profile")]
    pub profile: String,
}

fn default_profile() -> String { "default".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            profile: default_profile(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub color: bool,
    /// Print id, shelf and groups above each questioned card.
    #[serde(default = "default_true")]
    pub show_card_info: bool,
}

fn default_true() -> bool { true }

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: true,
            show_card_info: true,
        }
    }
}
