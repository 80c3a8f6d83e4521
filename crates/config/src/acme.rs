//! Certificate authority configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// ACME authority configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Contact email registered with the account
    #[validate(email(message = "acme email must be a valid email address"))]
    #[serde(default)]
    pub email: Option<String>,

    /// Which authority to talk to
    #[serde(default)]
    pub directory: AcmeDirectory,

    /// Key algorithm for certificate keys
    #[serde(default)]
    pub key_type: KeyType,

    /// Timeout for a single authority call
    #[validate(range(min = 1, max = 600))]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries for transient authority errors at the failing call site
    #[validate(range(max = 10))]
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,

    /// Total wait for all authorizations to become valid
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,

    /// First polling delay (never below one second)
    #[validate(range(min = 1000, max = 60000))]
    #[serde(default = "default_poll_initial_interval_ms")]
    pub poll_initial_interval_ms: u64,

    /// Polling delay cap
    #[validate(range(min = 1000, max = 300000))]
    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,

    /// Total wait for the order to become valid after finalization
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_finalize_timeout_secs")]
    pub finalize_timeout_secs: u64,
}

impl AcmeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn poll_initial_interval(&self) -> Duration {
        Duration::from_millis(self.poll_initial_interval_ms)
    }

    pub fn poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.poll_max_interval_ms)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            email: None,
            directory: AcmeDirectory::default(),
            key_type: KeyType::default(),
            request_timeout_secs: default_request_timeout_secs(),
            request_retries: default_request_retries(),
            validation_timeout_secs: default_validation_timeout_secs(),
            poll_initial_interval_ms: default_poll_initial_interval_ms(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            finalize_timeout_secs: default_finalize_timeout_secs(),
        }
    }
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_request_retries() -> u32 {
    3
}

pub(crate) fn default_validation_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_poll_initial_interval_ms() -> u64 {
    1000
}

pub(crate) fn default_poll_max_interval_ms() -> u64 {
    10000
}

pub(crate) fn default_finalize_timeout_secs() -> u64 {
    120
}

// ============================================================================
// Directory
// ============================================================================

/// ACME directory selection
///
/// `development` selects the in-process development authority, which issues
/// self-signed certificates without any network access.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AcmeDirectory {
    LetsEncrypt,
    #[default]
    LetsEncryptStaging,
    Development,
    Custom(String),
}

impl AcmeDirectory {
    /// Directory URL, or `None` for the development authority
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::LetsEncrypt => Some(LETSENCRYPT_PRODUCTION),
            Self::LetsEncryptStaging => Some(LETSENCRYPT_STAGING),
            Self::Development => None,
            Self::Custom(url) => Some(url),
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for AcmeDirectory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "letsencrypt" | "production" => Ok(Self::LetsEncrypt),
            "letsencrypt-staging" | "staging" => Ok(Self::LetsEncryptStaging),
            "development" | "dev" => Ok(Self::Development),
            _ => {
                let parsed = url::Url::parse(s.trim())
                    .map_err(|e| format!("invalid ACME directory '{}': {}", s, e))?;
                match parsed.scheme() {
                    "https" | "http" => Ok(Self::Custom(parsed.to_string())),
                    other => Err(format!(
                        "invalid ACME directory '{}': unsupported scheme '{}'. \
                         Use letsencrypt, letsencrypt-staging, development or an https URL",
                        s, other
                    )),
                }
            }
        }
    }
}

impl TryFrom<String> for AcmeDirectory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AcmeDirectory> for String {
    fn from(value: AcmeDirectory) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AcmeDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LetsEncrypt => write!(f, "letsencrypt"),
            Self::LetsEncryptStaging => write!(f, "letsencrypt-staging"),
            Self::Development => write!(f, "development"),
            Self::Custom(url) => write!(f, "{}", url),
        }
    }
}

// ============================================================================
// Key type
// ============================================================================

/// Certificate key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    #[default]
    Rsa2048,
    Rsa3072,
    Rsa4096,
    EcdsaP256,
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "rsa2048" | "rsa-2048" => Ok(Self::Rsa2048),
            "rsa3072" | "rsa-3072" => Ok(Self::Rsa3072),
            "rsa4096" | "rsa-4096" => Ok(Self::Rsa4096),
            "ecdsa-p256" | "p256" => Ok(Self::EcdsaP256),
            other => Err(format!(
                "invalid key-type '{}'. Valid types: rsa2048, rsa3072, rsa4096, ecdsa-p256",
                other
            )),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rsa2048 => "rsa2048",
            Self::Rsa3072 => "rsa3072",
            Self::Rsa4096 => "rsa4096",
            Self::EcdsaP256 => "ecdsa-p256",
        };
        f.write_str(s)
    }
}
