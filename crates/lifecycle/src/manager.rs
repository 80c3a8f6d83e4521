//! Caller-facing certificate operations
//!
//! [`CertificateManager`] turns orchestration outcomes into record state:
//! issue, renew, revoke, validate, check health and export. Persistence of
//! the returned records stays with the caller.

use std::sync::Arc;

use certkeeper_common::DomainId;
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::acme::{AcmeError, AcmeOrchestrator, IssuanceOutcome, IssuanceRequest, LockMode};
use crate::crypto;
use crate::export::{self, ExportError, ExportFormat};
use crate::health::{self, HealthSummary};
use crate::metrics::LifecycleMetrics;
use crate::record::{CertificateRecord, CertificateStatus, RenewalWindow, RevocationReason};
use crate::validate::Validator;

/// A failed issue or renew
///
/// `record` is the record after the failure: FAILED for permanent errors,
/// unchanged for transient ones, absent when the input was rejected before
/// a record could be built.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct IssuanceFailure {
    pub record: Option<Box<CertificateRecord>>,
    #[source]
    pub error: AcmeError,
}

impl IssuanceFailure {
    fn new(record: CertificateRecord, error: AcmeError) -> Self {
        Self {
            record: Some(Box::new(record)),
            error,
        }
    }

    fn input(error: AcmeError) -> Self {
        Self {
            record: None,
            error,
        }
    }
}

/// Options for [`CertificateManager::renew`]
#[derive(Debug, Clone, Copy)]
pub struct RenewOptions {
    /// Renew even outside the renewal window
    pub force: bool,
    pub lock: LockMode,
}

impl Default for RenewOptions {
    fn default() -> Self {
        Self {
            force: false,
            lock: LockMode::Wait,
        }
    }
}

/// Result of a renew call that did not fail
#[derive(Debug, Clone)]
pub enum Renewal {
    Renewed(CertificateRecord),
    /// Outside the renewal window; returned unchanged
    NotDue(CertificateRecord),
}

impl Renewal {
    pub fn record(&self) -> &CertificateRecord {
        match self {
            Self::Renewed(record) | Self::NotDue(record) => record,
        }
    }

    pub fn into_record(self) -> CertificateRecord {
        match self {
            Self::Renewed(record) | Self::NotDue(record) => record,
        }
    }

    pub fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed(_))
    }
}

/// Certificate lifecycle operations over one orchestrator
#[derive(Debug)]
pub struct CertificateManager {
    orchestrator: Arc<AcmeOrchestrator>,
    validator: Validator,
    window: RenewalWindow,
    metrics: LifecycleMetrics,
}

impl CertificateManager {
    pub fn new(
        orchestrator: Arc<AcmeOrchestrator>,
        window: RenewalWindow,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            orchestrator,
            validator: Validator::new(),
            window,
            metrics,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn orchestrator(&self) -> &Arc<AcmeOrchestrator> {
        &self.orchestrator
    }

    pub fn window(&self) -> RenewalWindow {
        self.window
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    /// Issue a new certificate.
    ///
    /// Any failure after the record is built leaves it FAILED.
    pub async fn issue(
        &self,
        domain_id: DomainId,
        primary_domain: &str,
        san_domains: &[String],
        wildcard: bool,
        auto_renew: bool,
        cancel: &CancellationToken,
    ) -> Result<CertificateRecord, IssuanceFailure> {
        let mut record =
            CertificateRecord::new(domain_id, primary_domain, san_domains, wildcard, auto_renew)
                .map_err(|e| IssuanceFailure::input(AcmeError::InvalidInput(e.to_string())))?;

        let started = Instant::now();
        let result = self
            .orchestrator
            .issue(&IssuanceRequest::for_record(&record), LockMode::Wait, cancel)
            .await
            .and_then(|outcome| apply_outcome(&mut record, outcome));
        self.record_metrics("issue", &result, started);

        match result {
            Ok(()) => {
                info!(id = %record.id(), domain = %record.primary_domain(), "Certificate issued and recorded");
                Ok(record)
            }
            Err(e) => {
                error!(domain = %record.primary_domain(), error = %e, "Certificate issuance failed");
                if let Err(transition) = record.mark_failed(e.to_string()) {
                    warn!(error = %transition, "Could not mark record failed");
                }
                Err(IssuanceFailure::new(record, e))
            }
        }
    }

    /// Re-issue for the record's domain set.
    ///
    /// Outside the renewal window this is a no-op unless forced. Permanent
    /// failures mark the record FAILED; transient ones leave it unchanged.
    pub async fn renew(
        &self,
        mut record: CertificateRecord,
        options: RenewOptions,
        cancel: &CancellationToken,
    ) -> Result<Renewal, IssuanceFailure> {
        if record.status() == CertificateStatus::Revoked {
            let error = AcmeError::InvalidInput(format!(
                "certificate '{}' is revoked and cannot be renewed",
                record.id()
            ));
            return Err(IssuanceFailure::new(record, error));
        }

        let now = Utc::now();
        if !options.force && record.expires_at().is_some() && !record.needs_renewal(self.window, now) {
            info!(
                id = %record.id(),
                domain = %record.primary_domain(),
                days_until_expiry = record.days_until_expiry(now),
                "Certificate not due for renewal"
            );
            return Ok(Renewal::NotDue(record));
        }

        let started = Instant::now();
        let result = self
            .orchestrator
            .issue(&IssuanceRequest::for_record(&record), options.lock, cancel)
            .await
            .and_then(|outcome| apply_outcome(&mut record, outcome));
        self.record_metrics("renew", &result, started);

        match result {
            Ok(()) => {
                info!(
                    id = %record.id(),
                    domain = %record.primary_domain(),
                    expires_at = ?record.expires_at(),
                    "Certificate renewed"
                );
                Ok(Renewal::Renewed(record))
            }
            Err(e) if e.is_permanent() => {
                error!(id = %record.id(), domain = %record.primary_domain(), error = %e, "Certificate renewal rejected");
                if let Err(transition) = record.mark_failed(e.to_string()) {
                    warn!(error = %transition, "Could not mark record failed");
                }
                Err(IssuanceFailure::new(record, e))
            }
            Err(e) => {
                warn!(id = %record.id(), domain = %record.primary_domain(), error = %e, "Certificate renewal deferred");
                Err(IssuanceFailure::new(record, e))
            }
        }
    }

    /// Revoke with the authority; returns whether the record is now REVOKED
    pub async fn revoke(&self, record: &mut CertificateRecord, reason: RevocationReason) -> bool {
        if !matches!(
            record.status(),
            CertificateStatus::Issued | CertificateStatus::Expired
        ) {
            warn!(id = %record.id(), status = %record.status(), "Only issued certificates can be revoked");
            return false;
        }

        let der = match crypto::certificate_ders(record.certificate_pem()) {
            Ok(mut ders) => ders.remove(0),
            Err(e) => {
                error!(id = %record.id(), error = %e, "Stored certificate is unreadable");
                return false;
            }
        };

        if let Err(e) = self.orchestrator.revoke(&der, reason).await {
            error!(id = %record.id(), domain = %record.primary_domain(), error = %e, "Revocation failed");
            return false;
        }

        match record.mark_revoked(reason) {
            Ok(()) => true,
            Err(e) => {
                error!(id = %record.id(), error = %e, "Revoked at the authority but record transition failed");
                false
            }
        }
    }

    pub fn validate(&self, record: &CertificateRecord) -> bool {
        self.validator.validate(record, Utc::now())
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Summarize records and refresh the fleet gauges
    pub fn check_health(&self, records: &[CertificateRecord]) -> HealthSummary {
        let summary = health::check_health(records, self.window, Utc::now());
        self.metrics.observe_health(&summary);
        summary
    }

    pub fn export(
        &self,
        record: &CertificateRecord,
        format: ExportFormat,
        passphrase: Option<&str>,
    ) -> Result<Vec<u8>, ExportError> {
        export::export(record, format, passphrase)
    }

    fn record_metrics(&self, operation: &str, result: &Result<(), AcmeError>, started: Instant) {
        let outcome = match result {
            Ok(()) => "success",
            Err(e) => e.kind(),
        };
        self.metrics
            .record_issuance(operation, outcome, started.elapsed().as_secs_f64());
    }
}

fn apply_outcome(record: &mut CertificateRecord, outcome: IssuanceOutcome) -> Result<(), AcmeError> {
    record.mark_issued(outcome.material)?;
    Ok(())
}
