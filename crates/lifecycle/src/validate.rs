//! Post-issuance certificate checks
//!
//! [`Validator::validate`] fails closed: missing material, an expiry that is
//! not in the future, or a leaf identity that differs from the record's
//! primary domain all yield `false`. Chain verification is delegated to a
//! [`ChainVerifier`]; the default accepts every chain.

use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::X509Certificate;

use crate::crypto::{self, CryptoError};
use crate::record::CertificateRecord;

/// Why a certificate failed validation
#[derive(Debug, Error)]
pub enum ValidationFailure {
    #[error("Certificate material is missing")]
    MissingMaterial,

    #[error("Certificate could not be parsed: {0}")]
    Unparseable(#[from] CryptoError),

    #[error("Certificate expired at {not_after}")]
    Expired { not_after: DateTime<Utc> },

    #[error("Certificate identity '{found}' does not match '{expected}'")]
    IdentityMismatch { expected: String, found: String },

    #[error("Chain verification failed: {0}")]
    Chain(String),
}

/// Verifies a leaf against its chain and a trust store
pub trait ChainVerifier: Send + Sync + Debug {
    fn verify(&self, leaf_der: &[u8], chain_ders: &[Vec<u8>]) -> Result<(), String>;
}

/// Accepts every chain
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChainVerification;

impl ChainVerifier for NoChainVerification {
    fn verify(&self, _leaf_der: &[u8], _chain_ders: &[Vec<u8>]) -> Result<(), String> {
        Ok(())
    }
}

/// Parsed fields of a certificate
#[derive(Debug, Clone, Serialize)]
pub struct CertificateDetails {
    pub subject: String,
    pub issuer: String,
    pub common_name: Option<String>,
    /// Hex, colon separated
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub signature_algorithm: String,
    /// DNS names from the subjectAltName extension
    pub san: Vec<String>,
}

impl CertificateDetails {
    /// CN, or the first DNS SAN when the subject has none
    pub fn primary_identity(&self) -> Option<&str> {
        self.common_name
            .as_deref()
            .or_else(|| self.san.first().map(String::as_str))
    }

    /// Whether the subject CN or any DNS SAN names `domain`
    pub fn covers(&self, domain: &str) -> bool {
        self.common_name
            .iter()
            .chain(self.san.iter())
            .any(|name| name.eq_ignore_ascii_case(domain))
    }
}

/// Parse the first certificate in `cert_pem`
pub fn inspect(cert_pem: &str) -> Result<CertificateDetails, CryptoError> {
    let ders = crypto::certificate_ders(cert_pem)?;
    let (_, cert) = x509_parser::parse_x509_certificate(&ders[0])
        .map_err(|e| CryptoError::Certificate(e.to_string()))?;
    details(&cert)
}

fn details(cert: &X509Certificate<'_>) -> Result<CertificateDetails, CryptoError> {
    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| CryptoError::Certificate("notBefore out of range".to_string()))?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| CryptoError::Certificate("notAfter out of range".to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let san = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => return Err(CryptoError::Certificate(e.to_string())),
    };

    Ok(CertificateDetails {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        common_name,
        serial: cert.raw_serial_as_string(),
        not_before,
        not_after,
        signature_algorithm: signature_algorithm_name(&cert.signature_algorithm.algorithm.to_id_string()),
        san,
    })
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption",
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption",
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption",
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256",
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384",
        "1.3.101.112" => "ed25519",
        other => other,
    }
    .to_string()
}

/// Certificate validator with a pluggable chain check
#[derive(Debug, Clone)]
pub struct Validator {
    chain: Arc<dyn ChainVerifier>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            chain: Arc::new(NoChainVerification),
        }
    }

    pub fn with_chain_verifier(verifier: Arc<dyn ChainVerifier>) -> Self {
        Self { chain: verifier }
    }

    /// Whether the record's certificate is usable as of `now`
    pub fn validate(&self, record: &CertificateRecord, now: DateTime<Utc>) -> bool {
        match self.check(record, now) {
            Ok(_) => true,
            Err(e) => {
                debug!(id = %record.id(), domain = %record.primary_domain(), reason = %e, "Certificate failed validation");
                false
            }
        }
    }

    /// Like [`validate`](Self::validate), with the reason and parsed details
    pub fn check(
        &self,
        record: &CertificateRecord,
        now: DateTime<Utc>,
    ) -> Result<CertificateDetails, ValidationFailure> {
        if record.certificate_pem().trim().is_empty() {
            return Err(ValidationFailure::MissingMaterial);
        }

        let ders = crypto::certificate_ders(record.certificate_pem())?;
        let (_, cert) = x509_parser::parse_x509_certificate(&ders[0])
            .map_err(|e| CryptoError::Certificate(e.to_string()))?;
        let details = details(&cert)?;

        if details.not_after <= now {
            return Err(ValidationFailure::Expired {
                not_after: details.not_after,
            });
        }

        if !details.covers(record.primary_domain()) {
            return Err(ValidationFailure::IdentityMismatch {
                expected: record.primary_domain().to_string(),
                found: details.primary_identity().unwrap_or_default().to_string(),
            });
        }

        let chain_ders = if record.chain_pem().trim().is_empty() {
            Vec::new()
        } else {
            crypto::certificate_ders(record.chain_pem())?
        };
        if let Err(e) = self.chain.verify(&ders[0], &chain_ders) {
            warn!(id = %record.id(), error = %e, "Certificate chain rejected");
            return Err(ValidationFailure::Chain(e));
        }

        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_key_pair, private_key_pem, KeySpec};
    use crate::record::IssuedMaterial;
    use certkeeper_common::DomainId;
    use chrono::Duration;
    use rcgen::{CertificateParams, DistinguishedName, DnType};
    use std::time::SystemTime;

    fn certificate(cn: &str, sans: &[&str], lifetime_days: i64) -> (String, crate::record::PrivateKeyPem) {
        certificate_with(Some(cn), sans, lifetime_days)
    }

    fn certificate_with(
        cn: Option<&str>,
        sans: &[&str],
        lifetime_days: i64,
    ) -> (String, crate::record::PrivateKeyPem) {
        let key = generate_key_pair(KeySpec::EcdsaP256).unwrap();
        let mut params =
            CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .unwrap();
        let mut dn = DistinguishedName::new();
        if let Some(cn) = cn {
            dn.push(DnType::CommonName, cn);
        }
        params.distinguished_name = dn;
        let now = SystemTime::now();
        params.not_before = (now - std::time::Duration::from_secs(3600)).into();
        params.not_after = if lifetime_days >= 0 {
            (now + std::time::Duration::from_secs(lifetime_days as u64 * 86_400)).into()
        } else {
            (now - std::time::Duration::from_secs(60)).into()
        };
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), private_key_pem(&key))
    }

    fn record_with(cert_pem: String, key: crate::record::PrivateKeyPem) -> CertificateRecord {
        let mut record =
            CertificateRecord::new(DomainId::new("dom"), "example.com", &[], false, true).unwrap();
        let now = Utc::now();
        record
            .mark_issued(IssuedMaterial {
                certificate_pem: cert_pem,
                chain_pem: String::new(),
                private_key: key,
                issued_at: now - Duration::hours(1),
                expires_at: now + Duration::days(1),
            })
            .unwrap();
        record
    }

    #[derive(Debug)]
    struct RejectAll;

    impl ChainVerifier for RejectAll {
        fn verify(&self, _leaf: &[u8], _chain: &[Vec<u8>]) -> Result<(), String> {
            Err("untrusted root".to_string())
        }
    }

    #[test]
    fn test_valid_certificate() {
        let (pem, key) = certificate("example.com", &["example.com", "www.example.com"], 90);
        let record = record_with(pem, key);

        let validator = Validator::new();
        assert!(validator.validate(&record, Utc::now()));

        let details = validator.check(&record, Utc::now()).unwrap();
        assert_eq!(details.common_name.as_deref(), Some("example.com"));
        assert_eq!(details.san, vec!["example.com", "www.example.com"]);
        assert_eq!(details.signature_algorithm, "ecdsa-with-SHA256");
    }

    #[test]
    fn test_missing_material_fails_closed() {
        let record =
            CertificateRecord::new(DomainId::new("dom"), "example.com", &[], false, true).unwrap();
        let validator = Validator::new();
        assert!(!validator.validate(&record, Utc::now()));
        assert!(matches!(
            validator.check(&record, Utc::now()),
            Err(ValidationFailure::MissingMaterial)
        ));
    }

    #[test]
    fn test_expired_certificate() {
        let (pem, key) = certificate("example.com", &["example.com"], -1);
        let record = record_with(pem, key);
        assert!(matches!(
            Validator::new().check(&record, Utc::now()),
            Err(ValidationFailure::Expired { .. })
        ));
    }

    #[test]
    fn test_identity_mismatch() {
        let (pem, key) = certificate("other.example", &["other.example"], 90);
        let record = record_with(pem, key);
        assert!(matches!(
            Validator::new().check(&record, Utc::now()),
            Err(ValidationFailure::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_identity_from_any_san_without_cn() {
        let (pem, key) = certificate_with(None, &["www.example.com", "EXAMPLE.com"], 90);
        let record = record_with(pem, key);

        let details = Validator::new().check(&record, Utc::now()).unwrap();
        assert!(details.common_name.is_none());
        assert!(details.covers("example.com"));
        assert!(!details.covers("api.example.com"));
    }

    #[test]
    fn test_identity_missing_from_sans() {
        let (pem, key) = certificate_with(None, &["www.example.com", "api.example.com"], 90);
        let record = record_with(pem, key);
        match Validator::new().check(&record, Utc::now()) {
            Err(ValidationFailure::IdentityMismatch { expected, found }) => {
                assert_eq!(expected, "example.com");
                assert_eq!(found, "www.example.com");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_chain_verifier_plugs_in() {
        let (pem, key) = certificate("example.com", &["example.com"], 90);
        let record = record_with(pem, key);
        let validator = Validator::with_chain_verifier(Arc::new(RejectAll));
        assert!(!validator.validate(&record, Utc::now()));
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        assert!(inspect("not a certificate").is_err());
    }
}
