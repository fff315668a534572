//! Configuration Management Module
//!
//! Loads the server/directory/settings file that drives a collection run.

pub mod storage;
pub mod types;

pub use storage::{expand_tilde, validate, ConfigError, ConfigStorage, DEFAULT_CONFIG_FILE};
pub use types::{CollectorConfig, DirectoryConfig, ServerConfig, Settings};
