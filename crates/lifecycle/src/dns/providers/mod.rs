//! DNS provider implementations
//!
//! - [`CloudflareProvider`]: Cloudflare v4 API
//! - [`WebhookProvider`]: generic webhook for custom systems
//! - [`MemoryDnsProvider`]: in-process table

mod cloudflare;
mod memory;
mod webhook;

pub use cloudflare::{CloudflareProvider, CLOUDFLARE_API_BASE};
pub use memory::MemoryDnsProvider;
pub use webhook::WebhookProvider;

use std::sync::Arc;
use std::time::Duration;

use certkeeper_config::{DnsProviderConfig, DnsProviderType};
use reqwest::StatusCode;

use super::credentials::load_credentials;
use super::provider::{DnsProvider, DnsProviderError, DnsResult};

/// Create a DNS provider from configuration
pub fn create_provider(config: &DnsProviderConfig) -> DnsResult<Arc<dyn DnsProvider>> {
    let timeout = config.api_timeout();

    match config.provider {
        DnsProviderType::Cloudflare => {
            let zone_id = config.zone_id.as_deref().ok_or_else(|| {
                DnsProviderError::Configuration("cloudflare provider requires a zone-id".to_string())
            })?;
            let credentials = load_credentials(config)?.ok_or_else(|| {
                DnsProviderError::Credentials(
                    "no credentials configured; set credentials-file or credentials-env"
                        .to_string(),
                )
            })?;
            let provider =
                CloudflareProvider::new(zone_id, credentials, config.url.as_deref(), timeout)?;
            Ok(Arc::new(provider))
        }
        DnsProviderType::Webhook => {
            let url = config.url.as_deref().ok_or_else(|| {
                DnsProviderError::Configuration("webhook provider requires a url".to_string())
            })?;
            let credentials = load_credentials(config)?;
            let provider =
                WebhookProvider::new(url, config.auth_header.clone(), credentials, timeout)?;
            Ok(Arc::new(provider))
        }
        DnsProviderType::Memory => Ok(Arc::new(MemoryDnsProvider::new())),
    }
}

/// Map a transport error from reqwest
pub(crate) fn map_send_error(e: reqwest::Error, timeout: Duration) -> DnsProviderError {
    if e.is_timeout() {
        DnsProviderError::Timeout {
            elapsed_secs: timeout.as_secs(),
        }
    } else {
        DnsProviderError::ApiRequest(format!("request failed: {}", e))
    }
}

/// Map a non-success HTTP status
///
/// 401/403 are authentication failures, 429 and 5xx are retryable, and
/// anything else is handed to `rejected`.
pub(crate) fn classify_status(
    status: StatusCode,
    body: &str,
    rejected: impl FnOnce(String) -> DnsProviderError,
) -> DnsProviderError {
    let message = format!("HTTP {} - {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DnsProviderError::Authentication(message)
        }
        StatusCode::TOO_MANY_REQUESTS => DnsProviderError::RateLimited {
            retry_after_secs: 60,
        },
        s if s.is_server_error() => DnsProviderError::ApiRequest(message),
        _ => rejected(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let rejected = |m: String| DnsProviderError::RecordCreation {
            record_name: "n".to_string(),
            message: m,
        };
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "", rejected),
            DnsProviderError::Authentication(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "", rejected).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "", rejected).is_retryable());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad", rejected),
            DnsProviderError::RecordCreation { .. }
        ));
    }

    #[test]
    fn test_create_memory_provider() {
        let provider = create_provider(&DnsProviderConfig::default()).unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_webhook_requires_url() {
        let config = DnsProviderConfig {
            provider: DnsProviderType::Webhook,
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(DnsProviderError::Configuration(_))
        ));
    }

    #[test]
    fn test_cloudflare_requires_credentials() {
        let config = DnsProviderConfig {
            provider: DnsProviderType::Cloudflare,
            zone_id: Some("zone".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(DnsProviderError::Credentials(_))
        ));
    }
}
