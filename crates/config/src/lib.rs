//! Configuration for certkeeper
//!
//! Configuration is read from KDL (primary), JSON or TOML, chosen by file
//! extension. Every section has defaults, so an empty document is a valid
//! (development) configuration.
//!
//! # Module Organization
//!
//! - [`acme`]: authority directory, key type, timeouts and polling
//! - [`renewal`]: renewal sweep interval, window and worker count
//! - [`dns`]: DNS provider selection, credentials and propagation checks
//! - [`runtime`]: storage location and logging
//! - [`validation`]: semantic validation across sections
//! - `kdl`: KDL format parsing
//! - `defaults`: embedded default configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use validator::Validate;

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
mod defaults;
pub mod dns;
mod kdl;
pub mod renewal;
pub mod runtime;
pub mod validation;

// ============================================================================
// Re-exports
// ============================================================================

pub use acme::{AcmeConfig, AcmeDirectory, KeyType, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use defaults::{create_default_config, DEFAULT_CONFIG_KDL};
pub use dns::{DnsProviderConfig, DnsProviderType, PropagationCheckConfig};
pub use renewal::RenewalConfig;
pub use runtime::{LoggingConfig, StorageConfig};

// ============================================================================
// Errors
// ============================================================================

/// Configuration validation error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field-level or semantic validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Main configuration structure for certkeeper
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validation::validate_config_semantics"))]
pub struct Config {
    /// Certificate authority settings
    #[validate(nested)]
    #[serde(default)]
    pub acme: AcmeConfig,

    /// Renewal scheduler settings
    #[validate(nested)]
    #[serde(default)]
    pub renewal: RenewalConfig,

    /// DNS provider used for DNS-01 challenges
    #[validate(nested)]
    #[serde(default)]
    pub dns_provider: DnsProviderConfig,

    /// Record store
    #[validate(nested)]
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging
    #[validate(nested)]
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        let config = match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            "toml" => Self::from_toml(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }?;

        tracing::debug!(
            path = %path.display(),
            directory = %config.acme.directory,
            dns_provider = %config.dns_provider.provider,
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Load the default embedded configuration.
    ///
    /// Falls back to the programmatic default if the embedded KDL fails to
    /// parse for any reason.
    pub fn default_embedded() -> Result<Self> {
        Self::from_kdl(DEFAULT_CONFIG_KDL).or_else(|e| {
            tracing::warn!(
                "Failed to parse embedded KDL config, using programmatic default: {}",
                e
            );
            Ok(create_default_config())
        })
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content
            .parse()
            .map_err(|e: ::kdl::KdlError| anyhow::anyhow!("{}", kdl::render_parse_error(content, &e)))?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Parse configuration from TOML format
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self).map_err(|e| ConfigError::Validation(e.to_string()))
    }
}
