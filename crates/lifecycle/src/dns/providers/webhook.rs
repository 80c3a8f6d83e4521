//! Generic webhook DNS provider
//!
//! Integrates with custom DNS management systems over HTTP.
//!
//! # Webhook API
//!
//! ## Create Record
//! ```text
//! POST {url}/records
//!
//! {
//!   "domain": "example.com",
//!   "record_name": "_acme-challenge.example.com",
//!   "record_type": "TXT",
//!   "record_value": "challenge-value",
//!   "ttl": 60
//! }
//!
//! Response: { "record_id": "unique-id" }
//! ```
//!
//! The endpoint must add a record; existing TXT values under the same name
//! stay in place.
//!
//! ## Delete Record
//! ```text
//! DELETE {url}/records/{record_id}?domain={domain}
//!
//! Response: 200, 204, or 404 when already gone
//! ```
//!
//! ## Check Domain Support
//! ```text
//! GET {url}/domains/{domain}/supported
//!
//! Response: { "supported": true }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{classify_status, map_send_error};
use crate::dns::credentials::Credentials;
use crate::dns::provider::{
    DnsProvider, DnsProviderError, DnsResult, ACME_CHALLENGE_RECORD, CHALLENGE_TTL,
};

/// Webhook DNS provider for custom integrations
#[derive(Debug)]
pub struct WebhookProvider {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl WebhookProvider {
    pub fn new(
        base_url: &str,
        auth_header: Option<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> DnsResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            credentials,
            timeout,
        })
    }

    fn add_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_header, &self.credentials) {
            (Some(header), Some(creds)) => request.header(header.as_str(), creds.as_bearer_token()),
            (None, Some(creds)) => request.bearer_auth(creds.as_bearer_token()),
            _ => request,
        }
    }
}

/// Zone-relative domain carried in webhook payloads
fn record_domain(record_name: &str) -> &str {
    record_name
        .strip_prefix(ACME_CHALLENGE_RECORD)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(record_name)
}

#[async_trait]
impl DnsProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn create_txt_record(&self, record_name: &str, record_value: &str) -> DnsResult<String> {
        debug!(record_name = %record_name, url = %self.base_url, "Creating TXT record via webhook");

        let body = CreateRecordRequest {
            domain: record_domain(record_name),
            record_name,
            record_type: "TXT",
            record_value,
            ttl: CHALLENGE_TTL,
        };

        let request = self
            .client
            .post(format!("{}/records", self.base_url))
            .json(&body);
        let response = self
            .add_auth(request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text, |message| {
                DnsProviderError::RecordCreation {
                    record_name: record_name.to_string(),
                    message,
                }
            }));
        }

        let created: CreateRecordResponse =
            response
                .json()
                .await
                .map_err(|e| DnsProviderError::RecordCreation {
                    record_name: record_name.to_string(),
                    message: format!("failed to parse webhook response: {}", e),
                })?;

        debug!(record_id = %created.record_id, "TXT record created via webhook");
        Ok(created.record_id)
    }

    async fn delete_txt_record(&self, record_name: &str, record_id: &str) -> DnsResult<()> {
        debug!(record_name = %record_name, record_id = %record_id, "Deleting TXT record via webhook");

        let request = self
            .client
            .delete(format!("{}/records/{}", self.base_url, record_id))
            .query(&[("domain", record_domain(record_name))]);
        let response = self
            .add_auth(request)
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
        let request = self
            .client
            .get(format!("{}/domains/{}/supported", self.base_url, domain));
        let response = self
            .add_auth(request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text, DnsProviderError::ApiRequest));
        }

        let support: DomainSupportResponse = response.json().await.map_err(|e| {
            DnsProviderError::ApiRequest(format!("failed to parse webhook response: {}", e))
        })?;
        Ok(support.supported)
    }
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    domain: &'a str,
    record_name: &'a str,
    record_type: &'a str,
    record_value: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    record_id: String,
}

#[derive(Debug, Deserialize)]
struct DomainSupportResponse {
    supported: bool,
}
