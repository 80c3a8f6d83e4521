//! Per-run DNS-01 challenge bookkeeping
//!
//! A [`ChallengeSet`] lives for exactly one orchestration run and maps each
//! order identifier to the TXT record that proves control of it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;

use super::provider::challenge_record_fqdn;

/// Compute the DNS-01 TXT value: base64url(SHA-256(key authorization))
pub fn dns01_record_value(key_authorization: &str) -> String {
    let digest = Sha256::digest(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Progress of a single challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    NotStarted,
    Provisioned,
    Validating,
    Valid,
    Invalid,
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::Provisioned => "provisioned",
            Self::Validating => "validating",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// One identifier's challenge
#[derive(Debug, Clone)]
pub struct ChallengeEntry {
    /// Order identifier (`example.com` or `*.example.com`)
    pub identifier: String,
    pub token: String,
    pub key_authorization: String,
    /// `_acme-challenge.<base domain>`
    pub record_name: String,
    /// Digest placed in the TXT record
    pub record_value: String,
    /// Authority URL used to signal readiness
    pub challenge_url: String,
    pub status: ChallengeStatus,
    /// Authority-reported reason when invalid
    pub error: Option<String>,
}

impl ChallengeEntry {
    pub fn new(
        identifier: impl Into<String>,
        token: impl Into<String>,
        key_authorization: impl Into<String>,
        challenge_url: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        let key_authorization = key_authorization.into();
        Self {
            record_name: challenge_record_fqdn(&identifier),
            record_value: dns01_record_value(&key_authorization),
            identifier,
            token: token.into(),
            key_authorization,
            challenge_url: challenge_url.into(),
            status: ChallengeStatus::NotStarted,
            error: None,
        }
    }
}

/// Challenges for one run, keyed by identifier in insertion order
#[derive(Debug, Clone, Default)]
pub struct ChallengeSet {
    entries: Vec<ChallengeEntry>,
}

impl ChallengeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for its identifier
    pub fn insert(&mut self, entry: ChallengeEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.identifier == entry.identifier)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&ChallengeEntry> {
        self.entries.iter().find(|e| e.identifier == identifier)
    }

    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut ChallengeEntry> {
        self.entries.iter_mut().find(|e| e.identifier == identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChallengeEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChallengeEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_status(&mut self, identifier: &str, status: ChallengeStatus) {
        if let Some(entry) = self.get_mut(identifier) {
            entry.status = status;
        }
    }

    pub fn mark_invalid(&mut self, identifier: &str, error: impl Into<String>) {
        if let Some(entry) = self.get_mut(identifier) {
            entry.status = ChallengeStatus::Invalid;
            entry.error = Some(error.into());
        }
    }

    /// Set every entry currently in `from` to `to`
    pub fn advance_all(&mut self, from: ChallengeStatus, to: ChallengeStatus) {
        for entry in self.entries.iter_mut().filter(|e| e.status == from) {
            entry.status = to;
        }
    }

    pub fn all_valid(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.status == ChallengeStatus::Valid)
    }

    /// First invalid entry in insertion order
    pub fn first_invalid(&self) -> Option<&ChallengeEntry> {
        self.entries
            .iter()
            .find(|e| e.status == ChallengeStatus::Invalid)
    }

    pub fn count(&self, status: ChallengeStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns01_record_value() {
        // 43 chars of unpadded base64url for a 32-byte digest
        let value = dns01_record_value("token.thumbprint");
        assert_eq!(value.len(), 43);
        assert!(!value.contains('='));
        assert!(!value.contains('+'));
        assert!(!value.contains('/'));
        assert_eq!(value, dns01_record_value("token.thumbprint"));
        assert_ne!(value, dns01_record_value("other.thumbprint"));
    }

    #[test]
    fn test_wildcard_and_apex_share_record_name() {
        let apex = ChallengeEntry::new("example.com", "t1", "t1.thumb", "https://ca/chall/1");
        let wild = ChallengeEntry::new("*.example.com", "t2", "t2.thumb", "https://ca/chall/2");

        assert_eq!(apex.record_name, "_acme-challenge.example.com");
        assert_eq!(apex.record_name, wild.record_name);
        assert_ne!(apex.record_value, wild.record_value);
    }

    #[test]
    fn test_challenge_set_lifecycle() {
        let mut set = ChallengeSet::new();
        set.insert(ChallengeEntry::new("example.com", "t1", "k1", "u1"));
        set.insert(ChallengeEntry::new("www.example.com", "t2", "k2", "u2"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.count(ChallengeStatus::NotStarted), 2);

        set.advance_all(ChallengeStatus::NotStarted, ChallengeStatus::Provisioned);
        set.advance_all(ChallengeStatus::Provisioned, ChallengeStatus::Validating);
        set.set_status("example.com", ChallengeStatus::Valid);
        assert!(!set.all_valid());

        set.mark_invalid("www.example.com", "incorrect TXT record");
        let invalid = set.first_invalid().unwrap();
        assert_eq!(invalid.identifier, "www.example.com");
        assert_eq!(invalid.error.as_deref(), Some("incorrect TXT record"));
    }

    #[test]
    fn test_insert_replaces_same_identifier() {
        let mut set = ChallengeSet::new();
        set.insert(ChallengeEntry::new("example.com", "t1", "k1", "u1"));
        set.insert(ChallengeEntry::new("example.com", "t9", "k9", "u9"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("example.com").unwrap().token, "t9");
    }

    #[test]
    fn test_empty_set_is_not_all_valid() {
        assert!(!ChallengeSet::new().all_valid());
    }
}
