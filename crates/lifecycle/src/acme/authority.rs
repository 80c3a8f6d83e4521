//! Certificate authority interface
//!
//! The orchestrator drives issuance through [`CertificateAuthority`]. The
//! production adapter speaks ACME through `instant-acme`; the development
//! authority issues from an in-memory root for local runs and tests.

use async_trait::async_trait;
use std::fmt::Debug;

use super::error::AcmeResult;
use crate::record::RevocationReason;

/// Opaque reference to an order held by the authority adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    pub id: String,
    /// Identifiers the order was placed for
    pub identifiers: Vec<String>,
}

/// Order status as reported by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// Snapshot of an order
#[derive(Debug, Clone)]
pub struct OrderState {
    pub status: OrderStatus,
    /// Authority problem detail for invalid orders
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Revoked,
    Expired,
}

impl AuthorizationStatus {
    /// Statuses that can never become valid again
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Invalid | Self::Revoked | Self::Expired)
    }
}

/// The DNS-01 challenge offered for one authorization
#[derive(Debug, Clone)]
pub struct DnsChallenge {
    pub url: String,
    pub token: String,
    /// `token.thumbprint`, bound to the account key
    pub key_authorization: String,
}

/// One identifier's authorization
#[derive(Debug, Clone)]
pub struct AuthorizationInfo {
    /// `example.com`, or `*.example.com` for wildcard authorizations
    pub identifier: String,
    pub status: AuthorizationStatus,
    pub dns_challenge: Option<DnsChallenge>,
    /// Challenge error reported by the authority
    pub error: Option<String>,
}

/// ACME-shaped certificate authority
#[async_trait]
pub trait CertificateAuthority: Send + Sync + Debug {
    /// Short name for logs ("acme", "development")
    fn name(&self) -> &'static str;

    /// Make sure a registered account exists; an existing account is success
    async fn ensure_account(&self) -> AcmeResult<()>;

    /// Place an order for `identifiers`
    async fn new_order(&self, identifiers: &[String]) -> AcmeResult<OrderHandle>;

    /// Current authorizations of an order, one per identifier
    async fn authorizations(&self, order: &OrderHandle) -> AcmeResult<Vec<AuthorizationInfo>>;

    /// Tell the authority a challenge can be validated
    async fn challenge_ready(&self, order: &OrderHandle, challenge_url: &str) -> AcmeResult<()>;

    /// Refresh and return the order state
    async fn order_state(&self, order: &OrderHandle) -> AcmeResult<OrderState>;

    /// Submit the CSR (DER)
    async fn finalize(&self, order: &OrderHandle, csr_der: &[u8]) -> AcmeResult<()>;

    /// Full chain PEM once available
    async fn certificate(&self, order: &OrderHandle) -> AcmeResult<Option<String>>;

    /// Revoke a certificate (DER)
    async fn revoke(&self, certificate_der: &[u8], reason: RevocationReason) -> AcmeResult<()>;

    /// Drop adapter-side order state
    async fn release(&self, order: &OrderHandle);
}
