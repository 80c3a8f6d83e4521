//! Certificate export
//!
//! PEM exports concatenate certificate, chain and key; PKCS#12 bundles the
//! certificate with its key and the first chain certificate. Missing
//! material is an error, never an empty result.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::{self, CryptoError};
use crate::record::CertificateRecord;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Certificate '{id}' has no certificate material")]
    MissingCertificate { id: String },

    #[error("Certificate '{id}' has no private key")]
    MissingPrivateKey { id: String },

    #[error("Unsupported export format '{0}'")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pem,
    Pkcs12,
}

impl ExportFormat {
    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pem => "pem",
            Self::Pkcs12 => "p12",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pem" => Ok(Self::Pem),
            "pkcs12" | "p12" | "pfx" => Ok(Self::Pkcs12),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem => f.write_str("pem"),
            Self::Pkcs12 => f.write_str("pkcs12"),
        }
    }
}

/// Export `record` in `format`.
///
/// `passphrase` only applies to PKCS#12; `None` encodes with an empty
/// password.
pub fn export(
    record: &CertificateRecord,
    format: ExportFormat,
    passphrase: Option<&str>,
) -> Result<Vec<u8>, ExportError> {
    if record.certificate_pem().trim().is_empty() {
        return Err(ExportError::MissingCertificate {
            id: record.id().to_string(),
        });
    }

    let bytes = match format {
        ExportFormat::Pem => {
            let mut out = String::new();
            for part in [
                record.certificate_pem(),
                record.chain_pem(),
                record.private_key().expose_secret(),
            ] {
                if part.trim().is_empty() {
                    continue;
                }
                out.push_str(part.trim_end());
                out.push('\n');
            }
            out.into_bytes()
        }
        ExportFormat::Pkcs12 => {
            if record.private_key().is_empty() {
                return Err(ExportError::MissingPrivateKey {
                    id: record.id().to_string(),
                });
            }
            crypto::build_pkcs12(
                record.certificate_pem(),
                record.private_key(),
                record.chain_pem(),
                passphrase,
                record.primary_domain(),
            )?
        }
    };

    debug!(id = %record.id(), format = %format, bytes = bytes.len(), "Exported certificate");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_key_pair, private_key_pem, KeySpec};
    use crate::record::{IssuedMaterial, PrivateKeyPem};
    use certkeeper_common::DomainId;
    use chrono::{Duration, Utc};
    use rcgen::CertificateParams;

    fn issued_record() -> CertificateRecord {
        let key = generate_key_pair(KeySpec::EcdsaP256).unwrap();
        let cert = CertificateParams::new(vec!["example.com".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let mut record =
            CertificateRecord::new(DomainId::new("dom"), "example.com", &[], false, true).unwrap();
        let now = Utc::now();
        record
            .mark_issued(IssuedMaterial {
                certificate_pem: cert.pem(),
                chain_pem: String::new(),
                private_key: private_key_pem(&key),
                issued_at: now,
                expires_at: now + Duration::days(90),
            })
            .unwrap();
        record
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("PEM".parse::<ExportFormat>().unwrap(), ExportFormat::Pem);
        assert_eq!("pfx".parse::<ExportFormat>().unwrap(), ExportFormat::Pkcs12);
        assert!(matches!(
            "der".parse::<ExportFormat>(),
            Err(ExportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_pem_export_contains_key_and_cert() {
        let record = issued_record();
        let text = String::from_utf8(export(&record, ExportFormat::Pem, None).unwrap()).unwrap();
        assert!(text.contains("BEGIN CERTIFICATE"));
        assert!(text.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_pkcs12_export() {
        let record = issued_record();
        let der = export(&record, ExportFormat::Pkcs12, Some("secret")).unwrap();
        assert!(!der.is_empty());
        assert!(p12::PFX::parse(&der).is_ok());
    }

    #[test]
    fn test_pkcs12_without_key_is_named_error() {
        let mut record = issued_record();
        record.attach_private_key(PrivateKeyPem::empty());

        let err = export(&record, ExportFormat::Pkcs12, None).unwrap_err();
        assert!(matches!(err, ExportError::MissingPrivateKey { .. }));
    }

    #[test]
    fn test_pending_record_has_nothing_to_export() {
        let record =
            CertificateRecord::new(DomainId::new("dom"), "example.com", &[], false, true).unwrap();
        assert!(matches!(
            export(&record, ExportFormat::Pem, None),
            Err(ExportError::MissingCertificate { .. })
        ));
    }
}
