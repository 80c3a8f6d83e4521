//! Fleet health summary
//!
//! Buckets records by expiry using the same [`RenewalWindow`] the scheduler
//! selects with, so `needs_renewal` here and scheduler selection agree.

use chrono::{DateTime, Utc};
use serde::Serialize;

use certkeeper_common::CertificateId;

use crate::record::{CertificateRecord, CertificateStatus, RenewalWindow};

/// Per-certificate entry of a [`HealthSummary`]
#[derive(Debug, Clone, Serialize)]
pub struct CertificateHealth {
    pub id: CertificateId,
    pub domain: String,
    pub status: CertificateStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` without an expiry
    pub days_until_expiry: Option<i64>,
    pub needs_renewal: bool,
}

/// Counts across a set of records
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    /// Expiry beyond the renewal window
    pub valid: usize,
    /// Expiry inside the renewal window but still in the future
    pub expiring_soon: usize,
    /// Expiry at or before now
    pub expired: usize,
    /// Status FAILED, counted independently of expiry
    pub failed: usize,
    pub certificates: Vec<CertificateHealth>,
}

impl HealthSummary {
    /// Whether nothing needs attention
    pub fn is_healthy(&self) -> bool {
        self.expired == 0 && self.failed == 0
    }
}

/// Summarize `records` as of `now`
pub fn check_health(
    records: &[CertificateRecord],
    window: RenewalWindow,
    now: DateTime<Utc>,
) -> HealthSummary {
    let mut summary = HealthSummary {
        total: records.len(),
        ..Default::default()
    };

    for record in records {
        let needs_renewal = record.needs_renewal(window, now);

        if let Some(expires_at) = record.expires_at() {
            if expires_at <= now {
                summary.expired += 1;
            } else if needs_renewal {
                summary.expiring_soon += 1;
            } else {
                summary.valid += 1;
            }
        }
        if record.status() == CertificateStatus::Failed {
            summary.failed += 1;
        }

        summary.certificates.push(CertificateHealth {
            id: record.id().clone(),
            domain: record.primary_domain().to_string(),
            status: record.status(),
            expires_at: record.expires_at(),
            days_until_expiry: record.days_until_expiry(now),
            needs_renewal,
        });
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IssuedMaterial, PrivateKeyPem};
    use certkeeper_common::DomainId;
    use chrono::Duration;

    fn issued(domain: &str, expires_in: Duration, now: DateTime<Utc>) -> CertificateRecord {
        let mut record =
            CertificateRecord::new(DomainId::new("dom"), domain, &[], false, true).unwrap();
        record
            .mark_issued(IssuedMaterial {
                certificate_pem: "cert".to_string(),
                chain_pem: String::new(),
                private_key: PrivateKeyPem::new("key"),
                issued_at: now - Duration::days(60),
                expires_at: now + expires_in,
            })
            .unwrap();
        record
    }

    #[test]
    fn test_buckets() {
        let now = Utc::now();
        let mut failed =
            CertificateRecord::new(DomainId::new("dom"), "failed.example", &[], false, true)
                .unwrap();
        failed.mark_failed("authorization rejected").unwrap();
        let pending =
            CertificateRecord::new(DomainId::new("dom"), "pending.example", &[], false, true)
                .unwrap();

        let records = vec![
            issued("valid.example", Duration::days(60), now),
            issued("soon.example", Duration::days(10), now),
            issued("expired.example", Duration::days(-1), now),
            failed,
            pending,
        ];
        let summary = check_health(&records, RenewalWindow::default(), now);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.expiring_soon, 1);
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_healthy());

        let by_domain = |d: &str| {
            summary
                .certificates
                .iter()
                .find(|c| c.domain == d)
                .unwrap()
                .clone()
        };
        assert_eq!(by_domain("valid.example").days_until_expiry, Some(60));
        assert!(!by_domain("valid.example").needs_renewal);
        assert!(by_domain("soon.example").needs_renewal);
        assert!(by_domain("expired.example").needs_renewal);
        assert_eq!(by_domain("pending.example").days_until_expiry, None);
        assert!(!by_domain("failed.example").needs_renewal);
    }

    #[test]
    fn test_window_boundary_matches_scheduler() {
        let now = Utc::now();
        let window = RenewalWindow::default();
        // 30.5 days left: outside the window, even though whole days is 30
        let record = issued("edge.example", Duration::hours(30 * 24 + 12), now);

        let summary = check_health(std::slice::from_ref(&record), window, now);
        assert_eq!(summary.certificates[0].days_until_expiry, Some(30));
        assert!(!summary.certificates[0].needs_renewal);
        assert_eq!(
            summary.certificates[0].needs_renewal,
            crate::scheduler::is_due(&record, window, now)
        );
    }

    #[test]
    fn test_empty() {
        let summary = check_health(&[], RenewalWindow::default(), Utc::now());
        assert_eq!(summary.total, 0);
        assert!(summary.is_healthy());
    }
}
