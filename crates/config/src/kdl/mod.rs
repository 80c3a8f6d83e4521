//! KDL configuration parsing.
//!
//! - `helpers`: Common parsing utility functions
//! - `acme`: authority block
//! - `dns`: DNS provider and propagation blocks
//! - `renewal`: renewal, storage and logging blocks

mod acme;
mod dns;
mod helpers;
mod renewal;

pub use helpers::offset_to_line_col;

use anyhow::Result;
use miette::Diagnostic;

use crate::Config;

use acme::parse_acme_config;
use dns::parse_dns_provider_config;
use renewal::{parse_logging_config, parse_renewal_config, parse_storage_config};

// ============================================================================
// Top-Level Document Parser
// ============================================================================

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: ::kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "acme" => config.acme = parse_acme_config(node)?,
            "renewal" => config.renewal = parse_renewal_config(node)?,
            "dns-provider" => config.dns_provider = parse_dns_provider_config(node)?,
            "storage" => config.storage = parse_storage_config(node)?,
            "logging" => config.logging = parse_logging_config(node)?,
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level configuration block: '{}'\n\
                     Valid blocks are: acme, renewal, dns-provider, storage, logging",
                    other
                ));
            }
        }
    }

    Ok(config)
}

// ============================================================================
// Error Rendering
// ============================================================================

/// Render a KDL parse error with the offending line and a caret
pub fn render_parse_error(content: &str, e: &::kdl::KdlError) -> String {
    let mut error_msg = String::from("KDL configuration parse error:\n\n");
    let lines: Vec<&str> = content.lines().collect();
    let mut found_details = false;

    if let Some(related) = e.related() {
        for diagnostic in related {
            found_details = true;
            error_msg.push_str(&format!("  {}\n", diagnostic));

            if let Some(labels) = diagnostic.labels() {
                for label in labels {
                    let (line, col) = offset_to_line_col(content, label.offset());
                    error_msg.push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                    if let Some(line_content) = lines.get(line.saturating_sub(1)) {
                        error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                        error_msg.push_str(&format!(
                            "     | {}^",
                            " ".repeat(col.saturating_sub(1))
                        ));
                        if let Some(label_msg) = label.label() {
                            error_msg.push_str(&format!(" {}", label_msg));
                        }
                        error_msg.push('\n');
                    }
                }
            }

            if let Some(help) = diagnostic.help() {
                error_msg.push_str(&format!("\n  Help: {}\n", help));
            }
        }
    }

    if !found_details {
        error_msg.push_str(&format!("  {}\n", e));
        error_msg.push_str("\n  Note: booleans are written #true / #false in KDL v2\n");
    }

    error_msg
}

#[cfg(test)]
mod tests {
    use crate::{AcmeDirectory, Config, DnsProviderType, KeyType};
    use std::path::PathBuf;

    #[test]
    fn test_full_document() {
        let config = Config::from_kdl(
            r#"
            acme {
                email "ops@example.com"
                directory "letsencrypt"
                key-type "ecdsa-p256"
                request-retries 5
                poll-max-interval-ms 20000
            }
            renewal {
                interval-hours 12
                window-days 21
                workers 8
                run-on-start #false
            }
            dns-provider {
                type "webhook"
                url "https://dns.internal/api"
                auth-header "X-API-Key"
                credentials-env "DNS_TOKEN"
                propagation {
                    enabled #true
                    timeout-secs 60
                    nameservers "1.1.1.1"
                }
            }
            storage {
                path "/srv/certs"
            }
            logging {
                level "debug"
                format "json"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.acme.email.as_deref(), Some("ops@example.com"));
        assert_eq!(config.acme.directory, AcmeDirectory::LetsEncrypt);
        assert_eq!(config.acme.key_type, KeyType::EcdsaP256);
        assert_eq!(config.acme.request_retries, 5);
        assert_eq!(config.acme.poll_max_interval_ms, 20000);
        assert_eq!(config.acme.poll_initial_interval_ms, 1000);

        assert_eq!(config.renewal.interval_hours, 12);
        assert_eq!(config.renewal.window_days, 21);
        assert_eq!(config.renewal.workers, 8);
        assert!(!config.renewal.run_on_start);

        assert_eq!(config.dns_provider.provider, DnsProviderType::Webhook);
        assert_eq!(config.dns_provider.auth_header.as_deref(), Some("X-API-Key"));
        assert!(config.dns_provider.propagation.enabled);
        assert_eq!(config.dns_provider.propagation.timeout_secs, 60);
        assert_eq!(config.dns_provider.propagation.nameservers, vec!["1.1.1.1".to_string()]);

        assert_eq!(config.storage.path, PathBuf::from("/srv/certs"));
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_block_rejected() {
        let err = Config::from_kdl("listeners {\n}\n").unwrap_err();
        assert!(err.to_string().contains("Unknown top-level configuration block"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_kdl("acme {\n    key-type \"dsa\"\n}\n").is_err());
        assert!(Config::from_kdl("acme {\n    directory \"gopher://x\"\n}\n").is_err());
        assert!(Config::from_kdl("dns-provider {\n    type \"route53\"\n}\n").is_err());
        assert!(Config::from_kdl("renewal {\n    workers -2\n}\n").is_err());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = Config::from_kdl("acme {\n    email \"unterminated\n}\n").unwrap_err();
        assert!(err.to_string().contains("KDL configuration parse error"));
    }
}
