//! Type-safe identifier newtypes for certkeeper.
//!
//! These types provide compile-time safety for identifiers, preventing
//! accidental mixing of different ID types (e.g., passing a DomainId
//! where a CertificateId is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Certificate record identifier.
///
/// Generated once when a record is created and stable across renewals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    /// Create a new random certificate ID (`cert_<uuid>`)
    pub fn generate() -> Self {
        Self(format!("cert_{}", Uuid::new_v4().simple()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CertificateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Managed domain identifier.
///
/// Owned by the domain-management side of the system; the lifecycle core
/// only carries it through so callers can join records back to domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a single issuance run.
///
/// Runs are short-lived; the ID exists to correlate the log lines of one
/// orchestration across account, order, challenge and finalize steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_id_generate() {
        let id1 = CertificateId::generate();
        let id2 = CertificateId::generate();

        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("cert_"));
    }

    #[test]
    fn test_domain_id() {
        let id = DomainId::new("dom-42");
        assert_eq!(id.as_str(), "dom-42");
        assert_eq!(id.to_string(), "dom-42");
        assert!(DomainId::default().is_empty());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = CertificateId::new("cert_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"cert_abc\"");

        let parsed: DomainId = serde_json::from_str("\"dom-1\"").unwrap();
        assert_eq!(parsed, DomainId::from("dom-1"));
    }

    #[test]
    fn test_run_id_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
