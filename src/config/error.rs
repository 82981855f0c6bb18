//! Errors raised while loading cronq.yaml.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML text is malformed or does not match the schema.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// As `YamlError`, with the file it came from.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A scheduler setting is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A seed task entry is unusable.
    #[error("invalid task '{name}': {reason}")]
    InvalidTask { name: String, reason: String },
}
