//! Settings configuration
//!
//! Default values are defined in `config/default.toml` and embedded at build
//! time. A user file is merged on top, so it only needs the keys it changes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::FilterPolicy;
use crate::bootstrap::BootstrapConfig;
use crate::model::DeviceConfig;
use crate::scorer::ScorerConfig;

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Configuration settings for a filtering run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub scoring: ScoringSettings,
    pub bootstrap: BootstrapConfig,
    pub device: DeviceConfig,
    #[serde(default)]
    pub model: ModelSettings,
}

/// Windowing and filtering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringSettings {
    /// Maximum tokens per scoring window
    pub window_size: usize,
    /// Perplexity strictly above which a text is flagged
    pub threshold: f64,
    /// Optional per-window perplexity limit
    #[serde(default)]
    pub window_threshold: Option<f64>,
    /// NFKC-normalize texts before tokenization
    #[serde(default)]
    pub normalize_nfkc: bool,
}

/// Model selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model variant id (optional, defaults to registry default)
    #[serde(default)]
    pub variant: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, _) => {
            *base = overlay.clone();
        }
    }
}

/// Parse user TOML content merged on top of default.toml.
fn parse_with_defaults(user_content: &str) -> Result<Settings> {
    let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
    let user: toml::Value = toml::from_str(user_content)?;
    merge_toml(&mut base, &user);
    let settings: Settings = base.try_into()?;
    Ok(settings)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "pplguard", "pplguard")
}

impl Settings {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load settings from the default configuration file.
    /// Falls back to embedded default.toml if the config file does not exist.
    pub fn load() -> Result<Self> {
        let Some(config_file) = Self::config_file() else {
            warn!("Could not determine config directory, using defaults");
            return Ok(Self::default());
        };

        if !config_file.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        debug!("Loading config from {:?}", config_file);
        let content = fs::read_to_string(&config_file)?;
        parse_with_defaults(&content)
    }

    /// Load settings from a specific file, merged on top of defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        parse_with_defaults(&content)
    }

    pub fn scorer_config(&self) -> ScorerConfig {
        ScorerConfig {
            window_size: self.scoring.window_size,
            normalize_nfkc: self.scoring.normalize_nfkc,
        }
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy {
            threshold: self.scoring.threshold,
            window_threshold: self.scoring.window_threshold,
        }
    }
}
