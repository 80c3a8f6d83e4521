//! DNS provider configuration for DNS-01 challenges.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// DNS provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DnsProviderConfig {
    /// Provider implementation
    #[serde(default)]
    pub provider: DnsProviderType,

    /// Cloudflare zone identifier
    #[serde(default)]
    pub zone_id: Option<String>,

    /// Webhook base URL, or an API base override for Cloudflare
    #[serde(default)]
    pub url: Option<String>,

    /// Custom header carrying the webhook credential (defaults to bearer auth)
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Path to a credentials file (JSON or plain token)
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Environment variable holding credentials
    #[serde(default)]
    pub credentials_env: Option<String>,

    /// Timeout for provider API calls
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// Bounded retries for transient provisioning failures
    #[validate(range(max = 10))]
    #[serde(default = "default_provision_retries")]
    pub provision_retries: u32,

    /// Optional propagation pre-check
    #[validate(nested)]
    #[serde(default)]
    pub propagation: PropagationCheckConfig,
}

impl DnsProviderConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials_file.is_some() || self.credentials_env.is_some()
    }
}

impl Default for DnsProviderConfig {
    fn default() -> Self {
        Self {
            provider: DnsProviderType::default(),
            zone_id: None,
            url: None,
            auth_header: None,
            credentials_file: None,
            credentials_env: None,
            api_timeout_secs: default_api_timeout_secs(),
            provision_retries: default_provision_retries(),
            propagation: PropagationCheckConfig::default(),
        }
    }
}

pub(crate) fn default_api_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_provision_retries() -> u32 {
    3
}

/// DNS provider implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsProviderType {
    Cloudflare,
    Webhook,
    /// In-process record table, for development and tests
    #[default]
    Memory,
}

impl FromStr for DnsProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloudflare" => Ok(Self::Cloudflare),
            "webhook" => Ok(Self::Webhook),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "invalid dns-provider type '{}'. Valid types: cloudflare, webhook, memory",
                other
            )),
        }
    }
}

impl fmt::Display for DnsProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cloudflare => "cloudflare",
            Self::Webhook => "webhook",
            Self::Memory => "memory",
        };
        f.write_str(s)
    }
}

/// Propagation pre-check settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PropagationCheckConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Delay before the first lookup
    #[validate(range(max = 600))]
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Delay between lookups
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Give up after this long
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_propagation_timeout_secs")]
    pub timeout_secs: u64,

    /// Resolvers to query; empty uses the system configuration
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,
}

impl Default for PropagationCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_secs: default_initial_delay_secs(),
            check_interval_secs: default_check_interval_secs(),
            timeout_secs: default_propagation_timeout_secs(),
            nameservers: default_nameservers(),
        }
    }
}

pub(crate) fn default_initial_delay_secs() -> u64 {
    10
}

pub(crate) fn default_check_interval_secs() -> u64 {
    5
}

pub(crate) fn default_propagation_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_nameservers() -> Vec<String> {
    vec![
        "8.8.8.8".to_string(),
        "1.1.1.1".to_string(),
        "9.9.9.9".to_string(),
    ]
}
