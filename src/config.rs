//! Configuration management for StarNotary

use crate::notary::VALIDATION_WINDOW_SECS;
use crate::star::STORY_WORD_LIMIT;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notary: NotaryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotaryConfig {
    #[serde(default = "default_window")]
    pub validation_window_secs: i64,
    #[serde(default = "default_word_limit")]
    pub story_word_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            validation_window_secs: default_window(),
            story_word_limit: default_word_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_api_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "./data/starnotary.db".to_string()
}

fn default_window() -> i64 {
    VALIDATION_WINDOW_SECS
}

fn default_word_limit() -> usize {
    STORY_WORD_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Loads `config.toml` from the working directory.
pub fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    load_config_from("config.toml")
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.trim().is_empty() {
        // Provide sane defaults when config.toml is absent
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    if config.database.path.is_empty() {
        return Err("database.path must be set in config.toml".into());
    }

    if config.notary.validation_window_secs <= 0 {
        return Err("notary.validation_window_secs must be positive".into());
    }

    if config.notary.story_word_limit == 0 {
        return Err("notary.story_word_limit must be positive".into());
    }

    Ok(config)
}
