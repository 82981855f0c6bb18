//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler loops,
//! backends, the HTTP API and seed task definitions.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{QueueConfig, SchedulerConfig, StorageConfig, TaskConfig};
pub use yaml::YamlLoader;
