//! Cloudflare DNS provider
//!
//! Uses the Cloudflare v4 API with a zone ID and an API token:
//!
//! ```text
//! POST   {base}/zones/{zone_id}/dns_records         create TXT record
//! DELETE {base}/zones/{zone_id}/dns_records/{id}    delete record
//! GET    {base}/zones/{zone_id}                     zone name lookup
//! ```
//!
//! Each create adds a separate record, so several TXT values can coexist
//! under one name.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use super::{classify_status, map_send_error};
use crate::dns::credentials::Credentials;
use crate::dns::provider::{
    domain_in_zone, DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL,
};

/// Default Cloudflare API base
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare DNS provider bound to a single zone
#[derive(Debug)]
pub struct CloudflareProvider {
    client: Client,
    base_url: String,
    zone_id: String,
    credentials: Credentials,
    timeout: Duration,
    /// Zone apex, fetched once
    zone_name: OnceCell<String>,
}

impl CloudflareProvider {
    pub fn new(
        zone_id: &str,
        credentials: Credentials,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> DnsResult<Self> {
        if zone_id.trim().is_empty() {
            return Err(DnsProviderError::Configuration(
                "cloudflare provider requires a zone-id".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(CLOUDFLARE_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            zone_id: zone_id.to_string(),
            credentials,
            timeout,
            zone_name: OnceCell::new(),
        })
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, self.zone_id)
    }

    async fn zone_name(&self) -> DnsResult<&str> {
        let name = self
            .zone_name
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .get(format!("{}/zones/{}", self.base_url, self.zone_id))
                    .bearer_auth(self.credentials.as_bearer_token())
                    .send()
                    .await
                    .map_err(|e| map_send_error(e, self.timeout))?;

                let status = response.status();
                if status == StatusCode::NOT_FOUND {
                    return Err(DnsProviderError::ZoneNotFound {
                        domain: self.zone_id.clone(),
                    });
                }
                let text = response.text().await.unwrap_or_default();
                if !status.is_success() {
                    return Err(classify_status(status, &text, DnsProviderError::ApiRequest));
                }

                let envelope: Envelope<ZoneResult> = parse_envelope(&text)?;
                trace!(zone_id = %self.zone_id, zone = %envelope.result.name, "Resolved Cloudflare zone");
                Ok(envelope.result.name)
            })
            .await?;
        Ok(name.as_str())
    }
}

fn parse_envelope<T: for<'de> Deserialize<'de>>(text: &str) -> DnsResult<Envelope<T>> {
    serde_json::from_str(text).map_err(|e| {
        DnsProviderError::ApiRequest(format!("failed to parse Cloudflare response: {}", e))
    })
}

fn join_errors(errors: &[ApiMessage]) -> String {
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    async fn create_txt_record(&self, record_name: &str, record_value: &str) -> DnsResult<String> {
        debug!(record_name = %record_name, zone_id = %self.zone_id, "Creating TXT record via Cloudflare");

        let body = CreateRecord {
            record_type: "TXT",
            name: record_name,
            content: record_value,
            ttl: CHALLENGE_TTL,
        };
        let response = self
            .client
            .post(self.records_url())
            .bearer_auth(self.credentials.as_bearer_token())
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text, |message| {
                DnsProviderError::RecordCreation {
                    record_name: record_name.to_string(),
                    message,
                }
            }));
        }

        let envelope: Envelope<RecordResult> = parse_envelope(&text)?;
        if !envelope.success {
            return Err(DnsProviderError::RecordCreation {
                record_name: record_name.to_string(),
                message: join_errors(&envelope.errors),
            });
        }

        debug!(record_id = %envelope.result.id, "TXT record created via Cloudflare");
        Ok(envelope.result.id)
    }

    async fn delete_txt_record(&self, record_name: &str, record_id: &str) -> DnsResult<()> {
        debug!(record_name = %record_name, record_id = %record_id, "Deleting TXT record via Cloudflare");

        let response = self
            .client
            .delete(format!("{}/{}", self.records_url(), record_id))
            .bearer_auth(self.credentials.as_bearer_token())
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(record_id = %record_id, "Record already deleted");
            return Ok(());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text, |message| {
                DnsProviderError::RecordDeletion {
                    record_id: record_id.to_string(),
                    message,
                }
            }));
        }
        Ok(())
    }

    async fn supports_domain(&self, domain: &str) -> DnsResult<bool> {
        let zone = self.zone_name().await?;
        Ok(domain_in_zone(domain, zone))
    }
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: T,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RecordResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ZoneResult {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_zone_id() {
        let err = CloudflareProvider::new(
            " ",
            Credentials::Token("t".to_string()),
            None,
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, DnsProviderError::Configuration(_)));
    }

    #[test]
    fn test_base_url_override() {
        let provider = CloudflareProvider::new(
            "zone123",
            Credentials::Token("t".to_string()),
            Some("http://127.0.0.1:9000/client/v4/"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            provider.records_url(),
            "http://127.0.0.1:9000/client/v4/zones/zone123/dns_records"
        );
    }

    #[test]
    fn test_envelope_errors_joined() {
        let envelope: Envelope<Option<RecordResult>> = serde_json::from_str(
            r#"{"success":false,"errors":[{"code":81057,"message":"record already exists"}],"result":null}"#,
        )
        .unwrap();
        assert!(!envelope.success);
        assert_eq!(join_errors(&envelope.errors), "record already exists (81057)");
    }
}
