//! YAML configuration parsing.

use std::path::Path;

use super::error::ConfigError;
use super::types::SchedulerConfig;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<SchedulerConfig, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;

        let config = Self::parse_unvalidated(&content).map_err(|e| match e {
            ConfigError::YamlError(source) => ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<SchedulerConfig, ConfigError> {
        let config = Self::parse_unvalidated(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_unvalidated(yaml: &str) -> Result<SchedulerConfig, ConfigError> {
        // An empty file means "all defaults".
        if yaml.trim().is_empty() {
            return Ok(SchedulerConfig::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}
