//! Configuration validation functions
//!
//! Field ranges are checked by the `validator` derive on each section; this
//! module holds the cross-field rules.

use std::borrow::Cow;
use std::net::IpAddr;

use certkeeper_common::LogFormat;
use tracing::trace;
use validator::ValidationError;

use crate::{Config, DnsProviderType};

fn semantic_error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Owned(message));
    err
}

/// Cross-section semantic validation
pub fn validate_config_semantics(config: &Config) -> Result<(), ValidationError> {
    trace!("Validating configuration semantics");

    let acme = &config.acme;
    if acme.poll_max_interval_ms < acme.poll_initial_interval_ms {
        return Err(semantic_error(
            "poll_interval_order",
            format!(
                "acme poll-max-interval-ms ({}) must not be below poll-initial-interval-ms ({})",
                acme.poll_max_interval_ms, acme.poll_initial_interval_ms
            ),
        ));
    }

    let dns = &config.dns_provider;
    match dns.provider {
        DnsProviderType::Cloudflare => {
            if dns.zone_id.as_deref().map_or(true, str::is_empty) {
                return Err(semantic_error(
                    "cloudflare_zone_id",
                    "dns-provider 'cloudflare' requires a zone-id".to_string(),
                ));
            }
            if !dns.has_credentials() {
                return Err(semantic_error(
                    "cloudflare_credentials",
                    "dns-provider 'cloudflare' requires credentials-file or credentials-env"
                        .to_string(),
                ));
            }
        }
        DnsProviderType::Webhook => {
            let url = dns.url.as_deref().unwrap_or_default();
            if url.is_empty() {
                return Err(semantic_error(
                    "webhook_url",
                    "dns-provider 'webhook' requires a url".to_string(),
                ));
            }
        }
        DnsProviderType::Memory => {}
    }

    if let Some(url) = dns.url.as_deref() {
        url::Url::parse(url).map_err(|e| {
            semantic_error("dns_url", format!("dns-provider url '{}' is invalid: {}", url, e))
        })?;
    }

    for ns in &dns.propagation.nameservers {
        if ns.parse::<IpAddr>().is_err() {
            return Err(semantic_error(
                "nameserver",
                format!("propagation nameserver '{}' is not an IP address", ns),
            ));
        }
    }

    config
        .logging
        .format
        .parse::<LogFormat>()
        .map_err(|e| semantic_error("log_format", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config_semantics(&Config::default()).is_ok());
    }

    #[test]
    fn test_cloudflare_requires_zone_id() {
        let mut config = Config::default();
        config.dns_provider.provider = DnsProviderType::Cloudflare;
        config.dns_provider.credentials_env = Some("CF_API_TOKEN".to_string());
        assert!(validate_config_semantics(&config).is_err());

        config.dns_provider.zone_id = Some("zone-1".to_string());
        assert!(validate_config_semantics(&config).is_ok());
    }

    #[test]
    fn test_webhook_requires_url() {
        let mut config = Config::default();
        config.dns_provider.provider = DnsProviderType::Webhook;
        assert!(validate_config_semantics(&config).is_err());

        config.dns_provider.url = Some("not a url".to_string());
        assert!(validate_config_semantics(&config).is_err());

        config.dns_provider.url = Some("https://dns.internal/api".to_string());
        assert!(validate_config_semantics(&config).is_ok());
    }

    #[test]
    fn test_poll_interval_order() {
        let mut config = Config::default();
        config.acme.poll_initial_interval_ms = 5000;
        config.acme.poll_max_interval_ms = 2000;
        assert!(validate_config_semantics(&config).is_err());
    }

    #[test]
    fn test_bad_nameserver_and_log_format() {
        let mut config = Config::default();
        config.dns_provider.propagation.nameservers = vec!["dns.google".to_string()];
        assert!(validate_config_semantics(&config).is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(validate_config_semantics(&config).is_err());
    }
}
