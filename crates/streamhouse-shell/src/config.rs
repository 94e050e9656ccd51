//! Configuration management for streamshell

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Statement service address (REST API)
    pub rest_api_url: String,

    /// Identity statements run as
    pub principal: String,

    /// Default output format
    pub output_format: OutputFormat,

    /// Enable colored output
    pub colored: bool,

    /// Capacity of each result view
    pub max_results: usize,

    /// Keyboard poll interval while a statement runs, in milliseconds
    pub input_poll_ms: u64,

    /// Statement status poll interval, in milliseconds
    pub status_poll_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rest_api_url: "http://localhost:8080".to_string(),
            principal: "u-local".to_string(),
            output_format: OutputFormat::Table,
            colored: true,
            max_results: 1000,
            input_poll_ms: 10,
            status_poll_ms: 1000,
        }
    }
}

impl Config {
    /// Load config from the default location or fall back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    pub fn input_poll(&self) -> Duration {
        Duration::from_millis(self.input_poll_ms.max(1))
    }

    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms.max(1))
    }

    /// Config file path (~/.streamhouse/shell.toml)
    pub fn config_path() -> PathBuf {
        streamhouse_dir().join("shell.toml")
    }

    /// Line editor history (~/.streamhouse/shell_history)
    pub fn history_path() -> PathBuf {
        streamhouse_dir().join("shell_history")
    }
}

fn streamhouse_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".streamhouse")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rest_api_url, "http://localhost:8080");
        assert_eq!(config.output_format, OutputFormat::Table);
        assert_eq!(config.max_results, 1000);
        assert_eq!(config.input_poll(), Duration::from_millis(10));
        assert_eq!(config.status_poll(), Duration::from_secs(1));
        assert!(config.colored);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml_str = r#"
            rest_api_url = "http://example.com:8080"
            output_format = "json"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rest_api_url, "http://example.com:8080");
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.max_results, 1000);
        assert_eq!(config.principal, "u-local");
    }

    #[test]
    fn test_unknown_output_format_rejected() {
        let toml_str = r#"output_format = "yaml""#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_zero_poll_intervals_are_clamped() {
        let config = Config {
            input_poll_ms: 0,
            status_poll_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.input_poll(), Duration::from_millis(1));
        assert_eq!(config.status_poll(), Duration::from_millis(1));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("shell.toml");

        let config = Config {
            rest_api_url: "http://test:8080".to_string(),
            principal: "sa-test".to_string(),
            output_format: OutputFormat::Json,
            colored: false,
            max_results: 25,
            input_poll_ms: 20,
            status_poll_ms: 250,
        };
        config.save_to(&config_path).unwrap();

        let loaded = Config::load_from(&config_path).unwrap();
        assert_eq!(loaded.rest_api_url, "http://test:8080");
        assert_eq!(loaded.principal, "sa-test");
        assert_eq!(loaded.output_format, OutputFormat::Json);
        assert_eq!(loaded.max_results, 25);
        assert_eq!(loaded.status_poll_ms, 250);
        assert!(!loaded.colored);
    }

    #[test]
    fn test_missing_config_file_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.max_results, 1000);
    }
}
