use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::streaming::{DEFAULT_MODEL, DEFAULT_PROVIDER_URL};

/// Default number of recent outcomes the synthesizer mines
pub const DEFAULT_LEARNING_WINDOW: i64 = 20;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub learning: LearningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LearningConfig {
    pub window_size: Option<i64>,
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Config::default();
            config.save()?;
            return Ok(config);
        }

        let contents = fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&config_path, toml_string)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Could not determine home directory")?;

        Ok(home.join(".mesmer").join("config.toml"))
    }

    /// Provider endpoint, defaulted
    pub fn provider_url(&self) -> &str {
        self.provider
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_PROVIDER_URL)
    }

    /// Provider model, defaulted
    pub fn model(&self) -> &str {
        self.provider.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Ledger database path, defaulted to ~/.mesmer/ledger.db
    pub fn database_path(&self) -> PathBuf {
        self.storage.database_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".mesmer")
                .join("ledger.db")
        })
    }

    /// Synthesis window, defaulted
    pub fn window_size(&self) -> i64 {
        self.learning.window_size.unwrap_or(DEFAULT_LEARNING_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.provider_url(), DEFAULT_PROVIDER_URL);
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.window_size(), DEFAULT_LEARNING_WINDOW);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.provider.model = Some("llama2:7b".to_string());
        config.learning.window_size = Some(50);

        let toml_string = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(deserialized.model(), "llama2:7b");
        assert_eq!(deserialized.window_size(), 50);
    }

    #[test]
    fn test_partial_config_parses() {
        let config: Config = toml::from_str("[provider]\nmodel = \"x\"\n").unwrap();
        assert_eq!(config.model(), "x");
        assert_eq!(config.window_size(), DEFAULT_LEARNING_WINDOW);
    }
}
