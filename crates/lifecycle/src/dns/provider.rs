//! DNS provider trait for DNS-01 challenges
//!
//! Defines the interface that all DNS providers must implement. Providers
//! append TXT records; they never overwrite existing values under the same
//! name, since a wildcard and its apex share `_acme-challenge.<domain>`.

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsProviderError>;

/// Errors that can occur during DNS provider operations
#[derive(Debug, Error)]
pub enum DnsProviderError {
    /// Authentication failed with the DNS provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Zone not found for the domain
    #[error("Zone not found for domain '{domain}'")]
    ZoneNotFound { domain: String },

    /// Record creation rejected by the provider
    #[error("Failed to create TXT record '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },

    /// Record deletion failed
    #[error("Failed to delete TXT record '{record_id}': {message}")]
    RecordDeletion { record_id: String, message: String },

    /// API request failed (network error or 5xx)
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Rate limited by provider
    #[error("Rate limited by DNS provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Request timeout
    #[error("Request timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Credential loading failed
    #[error("Failed to load credentials: {0}")]
    Credentials(String),

    /// Domain not supported by this provider
    #[error("Domain '{domain}' is not supported by this provider")]
    UnsupportedDomain { domain: String },

    /// Record did not become visible in DNS in time
    #[error("TXT record '{record_name}' did not propagate within {elapsed_secs}s")]
    PropagationTimeout { record_name: String, elapsed_secs: u64 },
}

impl DnsProviderError {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ApiRequest(_)
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::PropagationTimeout { .. }
        )
    }
}

/// Trait for DNS providers that support DNS-01 challenges
///
/// Implementations must be thread-safe and support concurrent operations.
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Returns the provider name (e.g., "cloudflare", "webhook")
    fn name(&self) -> &'static str;

    /// Add a TXT record.
    ///
    /// `record_name` is the full name (`_acme-challenge.example.com`). An
    /// existing record with the same name but a different value must be
    /// kept. Returns the provider's record ID for later cleanup.
    async fn create_txt_record(&self, record_name: &str, record_value: &str) -> DnsResult<String>;

    /// Delete a TXT record by ID.
    ///
    /// Deleting a record that no longer exists succeeds.
    async fn delete_txt_record(&self, record_name: &str, record_id: &str) -> DnsResult<()>;

    /// Check if the provider manages DNS for the given domain
    async fn supports_domain(&self, domain: &str) -> DnsResult<bool>;
}

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// TTL for challenge records (60 seconds)
pub const CHALLENGE_TTL: u32 = 60;

/// Strip a leading wildcard label
///
/// `*.example.com` and `example.com` both become `example.com`.
pub fn base_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// Build the full ACME challenge record name
///
/// For `example.com` and `*.example.com`, returns `_acme-challenge.example.com`
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, base_domain(domain))
}

/// Whether `domain` equals `zone` or sits underneath it
pub fn domain_in_zone(domain: &str, zone: &str) -> bool {
    let domain = base_domain(domain).trim_end_matches('.');
    let zone = zone.trim_end_matches('.');
    domain.eq_ignore_ascii_case(zone)
        || (domain.len() > zone.len()
            && domain.as_bytes()[domain.len() - zone.len() - 1] == b'.'
            && domain[domain.len() - zone.len()..].eq_ignore_ascii_case(zone))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_domain() {
        assert_eq!(base_domain("example.com"), "example.com");
        assert_eq!(base_domain("*.example.com"), "example.com");
        assert_eq!(base_domain("*.sub.example.com"), "sub.example.com");
    }

    #[test]
    fn test_challenge_record_fqdn() {
        assert_eq!(challenge_record_fqdn("example.com"), "_acme-challenge.example.com");
        assert_eq!(challenge_record_fqdn("*.example.com"), "_acme-challenge.example.com");
        assert_eq!(
            challenge_record_fqdn("sub.example.com"),
            "_acme-challenge.sub.example.com"
        );
    }

    #[test]
    fn test_domain_in_zone() {
        assert!(domain_in_zone("example.com", "example.com"));
        assert!(domain_in_zone("_acme-challenge.www.example.com", "example.com"));
        assert!(domain_in_zone("*.example.com", "example.com."));
        assert!(!domain_in_zone("badexample.com", "example.com"));
        assert!(!domain_in_zone("example.org", "example.com"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DnsProviderError::ApiRequest("502".to_string()).is_retryable());
        assert!(DnsProviderError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(DnsProviderError::Timeout { elapsed_secs: 30 }.is_retryable());
        assert!(!DnsProviderError::Authentication("bad token".to_string()).is_retryable());
        assert!(!DnsProviderError::ZoneNotFound { domain: "x.com".to_string() }.is_retryable());
    }

    #[test]
    fn test_dns_provider_error_display() {
        let err = DnsProviderError::RecordCreation {
            record_name: "_acme-challenge.example.com".to_string(),
            message: "API error".to_string(),
        };
        assert!(err.to_string().contains("_acme-challenge.example.com"));

        let err = DnsProviderError::RateLimited { retry_after_secs: 60 };
        assert!(err.to_string().contains("60"));
    }
}
