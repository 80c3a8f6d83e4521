//! Certificate record data model and lifecycle state machine
//!
//! A [`CertificateRecord`] moves through
//!
//! ```text
//! PENDING ──issue──▶ ISSUED ──expire──▶ EXPIRED
//!    │                 │  ▲               │
//!    │                 │  └────renew──────┤
//!    ▼                 ▼                  ▼
//!  FAILED ◀──reject── ...              REVOKED
//! ```
//!
//! Transitions are methods on the record so the invariants hold at every
//! step: `expires_at` is set iff the status is ISSUED, EXPIRED or REVOKED,
//! an ISSUED record always has `expires_at > issued_at`, and `updated_at`
//! never moves backwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use certkeeper_common::{CertificateId, DomainId};

use crate::crypto::{self, CryptoError};

/// Record-level errors
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: CertificateStatus,
        to: CertificateStatus,
    },

    /// Issued material whose expiry is not after its issue time
    #[error("Certificate expires at {expires_at} which is not after issued_at {issued_at}")]
    InvalidValidity {
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    #[error("Certificate material is empty")]
    MissingMaterial,
}

// ============================================================================
// Domain normalization
// ============================================================================

/// Normalize a domain name: trim, lowercase, strip the trailing root dot.
///
/// The result must contain at least one dot and consist of LDH labels. A
/// leading `*.` label is accepted when `allow_wildcard` is set.
pub fn normalize_domain(domain: &str, allow_wildcard: bool) -> Result<String, RecordError> {
    let invalid = |reason: &str| RecordError::InvalidDomain {
        domain: domain.to_string(),
        reason: reason.to_string(),
    };

    let normalized = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(invalid("empty"));
    }
    if normalized.len() > 253 {
        return Err(invalid("longer than 253 characters"));
    }

    let (is_wildcard, base) = match normalized.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, normalized.as_str()),
    };
    if is_wildcard && !allow_wildcard {
        return Err(invalid("wildcard not allowed here; use the wildcard flag"));
    }
    if !base.contains('.') {
        return Err(invalid("must contain at least one dot"));
    }

    for label in base.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("labels must be 1-63 characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels must not start or end with '-'"));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("labels may only contain a-z, 0-9, '-' and '_'"));
        }
    }

    Ok(normalized)
}

// ============================================================================
// Renewal window
// ============================================================================

/// Time-before-expiry threshold shared by the scheduler and health reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalWindow(Duration);

impl RenewalWindow {
    /// 30 days
    pub const DEFAULT_DAYS: u32 = 30;

    pub fn from_days(days: u32) -> Self {
        Self(Duration::days(i64::from(days)))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn days(&self) -> i64 {
        self.0.num_days()
    }

    /// `expires_at <= now + window`
    pub fn needs_renewal(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        expires_at <= now + self.0
    }
}

impl Default for RenewalWindow {
    fn default() -> Self {
        Self::from_days(Self::DEFAULT_DAYS)
    }
}

/// Whole days from `now` until `expires_at`, rounded down.
///
/// Negative once expired; an expiry 12 hours ago is day -1.
pub fn days_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds().div_euclid(86_400)
}

// ============================================================================
// Status
// ============================================================================

/// Certificate lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificateStatus {
    Pending,
    Issued,
    Expired,
    Revoked,
    Failed,
}

impl CertificateStatus {
    /// Whether a record in this status carries `expires_at`
    pub fn has_expiry(&self) -> bool {
        matches!(self, Self::Issued | Self::Expired | Self::Revoked)
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Issued => "ISSUED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
            Self::Failed => "FAILED",
        };
        f.pad(s)
    }
}

// ============================================================================
// Revocation reasons
// ============================================================================

/// RFC 5280 CRLReason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    #[default]
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// Numeric reason code
    pub fn code(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "unspecified" | "0" => Ok(Self::Unspecified),
            "keycompromise" | "1" => Ok(Self::KeyCompromise),
            "cacompromise" | "2" => Ok(Self::CaCompromise),
            "affiliationchanged" | "3" => Ok(Self::AffiliationChanged),
            "superseded" | "4" => Ok(Self::Superseded),
            "cessationofoperation" | "5" => Ok(Self::CessationOfOperation),
            "certificatehold" | "6" => Ok(Self::CertificateHold),
            "removefromcrl" | "8" => Ok(Self::RemoveFromCrl),
            "privilegewithdrawn" | "9" => Ok(Self::PrivilegeWithdrawn),
            "aacompromise" | "10" => Ok(Self::AaCompromise),
            _ => Err(format!("unknown revocation reason '{}'", s)),
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::CaCompromise => "cACompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCrl => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AaCompromise => "aACompromise",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Private key secret
// ============================================================================

/// PEM-encoded private key.
///
/// `Debug` and `Display` never print the key, and records skip it when
/// serialized; stores that persist keys do so explicitly.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PrivateKeyPem(String);

impl PrivateKeyPem {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for PrivateKeyPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("PrivateKeyPem(<empty>)")
        } else {
            f.write_str("PrivateKeyPem(<redacted>)")
        }
    }
}

impl fmt::Display for PrivateKeyPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Material produced by a successful issuance
#[derive(Debug, Clone)]
pub struct IssuedMaterial {
    pub certificate_pem: String,
    pub chain_pem: String,
    pub private_key: PrivateKeyPem,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Certificate record
// ============================================================================

/// A managed certificate and its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    id: CertificateId,
    #[serde(default)]
    domain_id: DomainId,
    primary_domain: String,
    #[serde(default)]
    san_domains: Vec<String>,
    #[serde(default)]
    wildcard: bool,

    #[serde(default)]
    certificate_pem: String,
    #[serde(skip)]
    private_key: PrivateKeyPem,
    #[serde(default)]
    chain_pem: String,

    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,

    auto_renew: bool,
    status: CertificateStatus,

    /// Reason for the last FAILED transition
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    revocation_reason: Option<RevocationReason>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CertificateRecord {
    /// Create a PENDING record.
    ///
    /// The primary domain and SANs are normalized and deduplicated; a SAN of
    /// `*.primary` is folded into the wildcard flag.
    pub fn new(
        domain_id: DomainId,
        primary_domain: &str,
        san_domains: &[String],
        wildcard: bool,
        auto_renew: bool,
    ) -> Result<Self, RecordError> {
        let primary = normalize_domain(primary_domain, false)?;
        let wildcard_name = format!("*.{}", primary);

        let mut wildcard = wildcard;
        let mut sans: Vec<String> = Vec::with_capacity(san_domains.len());
        for san in san_domains {
            let san = normalize_domain(san, true)?;
            if san == wildcard_name {
                wildcard = true;
            } else if san != primary && !sans.contains(&san) {
                sans.push(san);
            }
        }

        let now = Utc::now();
        let record = Self {
            id: CertificateId::generate(),
            domain_id,
            primary_domain: primary,
            san_domains: sans,
            wildcard,
            certificate_pem: String::new(),
            private_key: PrivateKeyPem::empty(),
            chain_pem: String::new(),
            issued_at: None,
            expires_at: None,
            auto_renew,
            status: CertificateStatus::Pending,
            last_error: None,
            revocation_reason: None,
            created_at: now,
            updated_at: now,
        };

        trace!(
            id = %record.id,
            domain = %record.primary_domain,
            sans = record.san_domains.len(),
            wildcard = record.wildcard,
            "Created certificate record"
        );
        Ok(record)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> &CertificateId {
        &self.id
    }

    pub fn domain_id(&self) -> &DomainId {
        &self.domain_id
    }

    pub fn primary_domain(&self) -> &str {
        &self.primary_domain
    }

    pub fn san_domains(&self) -> &[String] {
        &self.san_domains
    }

    pub fn wildcard(&self) -> bool {
        self.wildcard
    }

    /// Full identifier list for the CSR and the order
    pub fn san_list(&self) -> Result<Vec<String>, CryptoError> {
        crypto::build_san_list(&self.primary_domain, &self.san_domains, self.wildcard)
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn chain_pem(&self) -> &str {
        &self.chain_pem
    }

    pub fn private_key(&self) -> &PrivateKeyPem {
        &self.private_key
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn auto_renew(&self) -> bool {
        self.auto_renew
    }

    pub fn status(&self) -> CertificateStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn revocation_reason(&self) -> Option<RevocationReason> {
        self.revocation_reason
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn has_material(&self) -> bool {
        !self.certificate_pem.trim().is_empty()
    }

    pub fn set_auto_renew(&mut self, auto_renew: bool) {
        self.auto_renew = auto_renew;
        self.touch();
    }

    /// Re-attach a key loaded from caller-controlled storage
    pub fn attach_private_key(&mut self, key: PrivateKeyPem) {
        self.private_key = key;
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    fn transition(&mut self, to: CertificateStatus) {
        debug!(
            id = %self.id,
            domain = %self.primary_domain,
            from = %self.status,
            to = %to,
            "Certificate status transition"
        );
        self.status = to;
        self.touch();
    }

    /// Store freshly issued material and move to ISSUED.
    ///
    /// Allowed from every status except REVOKED.
    pub fn mark_issued(&mut self, material: IssuedMaterial) -> Result<(), RecordError> {
        if self.status == CertificateStatus::Revoked {
            return Err(RecordError::InvalidTransition {
                from: self.status,
                to: CertificateStatus::Issued,
            });
        }
        if material.expires_at <= material.issued_at {
            return Err(RecordError::InvalidValidity {
                issued_at: material.issued_at,
                expires_at: material.expires_at,
            });
        }
        if material.certificate_pem.trim().is_empty() || material.private_key.is_empty() {
            return Err(RecordError::MissingMaterial);
        }

        self.certificate_pem = material.certificate_pem;
        self.chain_pem = material.chain_pem;
        self.private_key = material.private_key;
        self.issued_at = Some(material.issued_at);
        self.expires_at = Some(material.expires_at);
        self.last_error = None;
        self.revocation_reason = None;
        self.transition(CertificateStatus::Issued);
        Ok(())
    }

    /// Move to FAILED, clearing dates and material.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), RecordError> {
        if self.status == CertificateStatus::Revoked {
            return Err(RecordError::InvalidTransition {
                from: self.status,
                to: CertificateStatus::Failed,
            });
        }

        self.certificate_pem.clear();
        self.chain_pem.clear();
        self.private_key = PrivateKeyPem::empty();
        self.issued_at = None;
        self.expires_at = None;
        self.last_error = Some(reason.into());
        self.transition(CertificateStatus::Failed);
        Ok(())
    }

    /// Move an ISSUED or EXPIRED record to REVOKED.
    pub fn mark_revoked(&mut self, reason: RevocationReason) -> Result<(), RecordError> {
        match self.status {
            CertificateStatus::Issued | CertificateStatus::Expired => {
                self.revocation_reason = Some(reason);
                self.transition(CertificateStatus::Revoked);
                Ok(())
            }
            from => Err(RecordError::InvalidTransition {
                from,
                to: CertificateStatus::Revoked,
            }),
        }
    }

    /// Move ISSUED to EXPIRED once `expires_at <= now`.
    ///
    /// Returns whether the status changed.
    pub fn mark_expired_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match (self.status, self.expires_at) {
            (CertificateStatus::Issued, Some(expires_at)) if expires_at <= now => {
                self.transition(CertificateStatus::Expired);
                true
            }
            _ => false,
        }
    }

    /// Whether the shared window says this record should be renewed now
    pub fn needs_renewal(&self, window: RenewalWindow, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires_at| window.needs_renewal(expires_at, now))
            .unwrap_or(false)
    }

    /// Whole days until expiry, `None` without an expiry
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|expires_at| days_until(expires_at, now))
    }

    /// Check the record-level invariants
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status.has_expiry() != self.expires_at.is_some() {
            return Err(format!(
                "status {} with expires_at {:?}",
                self.status, self.expires_at
            ));
        }
        if self.status == CertificateStatus::Issued {
            match (self.issued_at, self.expires_at) {
                (Some(issued), Some(expires)) if expires > issued => {}
                _ => return Err("ISSUED without a valid issued_at/expires_at".to_string()),
            }
        }
        if self.updated_at < self.created_at {
            return Err("updated_at before created_at".to_string());
        }
        Ok(())
    }
}
