//! Storage and logging configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Record store location
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// Directory holding records and account credentials
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

pub(crate) fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/certkeeper")
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[validate(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}

pub(crate) fn default_log_format() -> String {
    "pretty".to_string()
}
