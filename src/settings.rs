use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

const CONFIG_PATH_ENV: &str = "CATALOG_CONFIG";
const DATABASE_PATH_ENV: &str = "CATALOG_DB";
const APP_DIR: &str = "catalog";

/// Runtime configuration, layered as defaults, then the TOML config file,
/// then environment variables. CLI flags are applied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Used when `RUST_LOG` is not set.
    pub log_level: String,
    pub lookup: LookupSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
            log_level: "warn".to_string(),
            lookup: LookupSettings::default(),
        }
    }
}

impl Settings {
    /// Loads from `$CATALOG_CONFIG` (or the platform config dir) and applies
    /// `$CATALOG_DB`. A missing config file is not an error.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .ok()
            .or_else(Self::default_config_path);
        let database_override = std::env::var(DATABASE_PATH_ENV).ok();
        Self::load_from(config_path.as_deref(), database_override)
    }

    pub fn load_from(config_path: Option<&Path>, database_override: Option<String>) -> anyhow::Result<Self> {
        let mut settings = match config_path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            _ => Self::default(),
        };

        if let Some(path) = database_override.filter(|value| !value.trim().is_empty()) {
            settings.database_path = PathBuf::from(path);
        }
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("catalog.db")
    }

    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }
}

/// HTTP settings for ISBN metadata lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LookupSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Try Google Books when Open Library has nothing.
    pub google_fallback: bool,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 6,
            user_agent: format!("catalog/{}", env!("CARGO_PKG_VERSION")),
            google_fallback: true,
        }
    }
}
