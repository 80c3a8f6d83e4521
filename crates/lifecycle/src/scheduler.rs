//! Background certificate renewal scheduler
//!
//! Periodically sweeps the record store, selects certificates inside the
//! renewal window and renews them on a bounded worker pool. Each task is
//! independent; a transient failure leaves the record for the next sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use certkeeper_common::{CertificateId, DomainId};
use certkeeper_config::RenewalConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acme::{AcmeError, LockMode};
use crate::manager::{CertificateManager, RenewOptions};
use crate::record::{CertificateRecord, CertificateStatus, RenewalWindow};
use crate::storage::RecordStore;

/// Minimum sweep interval (1 minute)
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Whether the scheduler renews `record` as of `now`
pub fn is_due(record: &CertificateRecord, window: RenewalWindow, now: DateTime<Utc>) -> bool {
    record.status() == CertificateStatus::Issued
        && record.auto_renew()
        && record.needs_renewal(window, now)
}

/// One renewal, consumed exactly once by a worker
#[derive(Debug, Clone)]
pub struct RenewalTask {
    pub domain_id: DomainId,
    pub record: CertificateRecord,
    /// 1 for the first attempt; grows with consecutive transient failures
    pub attempt: u32,
}

/// Records due for renewal, in input order
pub fn select_due(
    records: &[CertificateRecord],
    window: RenewalWindow,
    now: DateTime<Utc>,
) -> Vec<&CertificateRecord> {
    records
        .iter()
        .filter(|record| is_due(record, window, now))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Renewed,
    /// Permanent rejection; the record is FAILED
    Failed,
    /// Record unchanged, retried next sweep
    Transient,
    /// Another run for the domain was in flight
    Skipped,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Renewed => "renewed",
            Self::Failed => "failed",
            Self::Transient => "transient",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    fn from_error(error: &AcmeError) -> Self {
        match error.root_cause() {
            AcmeError::AlreadyInFlight { .. } => Self::Skipped,
            AcmeError::Cancelled => Self::Cancelled,
            e if e.is_permanent() => Self::Failed,
            _ => Self::Transient,
        }
    }
}

/// Counts for one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub selected: usize,
    pub renewed: usize,
    pub failed: usize,
    pub transient: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Non-renewing records moved to EXPIRED
    pub expired: usize,
    pub duration: Duration,
}

impl SweepReport {
    fn count(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Renewed => self.renewed += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Transient => self.transient += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub workers: usize,
    pub run_on_start: bool,
}

impl From<&RenewalConfig> for SchedulerSettings {
    fn from(config: &RenewalConfig) -> Self {
        Self {
            interval: config.interval(),
            workers: config.workers,
            run_on_start: config.run_on_start,
        }
    }
}

/// Background certificate renewal scheduler
pub struct RenewalScheduler {
    manager: Arc<CertificateManager>,
    store: Arc<dyn RecordStore>,
    settings: SchedulerSettings,
    /// Consecutive transient failures per certificate
    attempts: Mutex<HashMap<CertificateId, u32>>,
}

impl RenewalScheduler {
    pub fn new(
        manager: Arc<CertificateManager>,
        store: Arc<dyn RecordStore>,
        settings: SchedulerSettings,
    ) -> Self {
        let settings = SchedulerSettings {
            interval: settings.interval.max(MIN_SWEEP_INTERVAL),
            workers: settings.workers.max(1),
            ..settings
        };
        Self {
            manager,
            store,
            settings,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Consecutive transient failures recorded for `id`
    pub fn attempts(&self, id: &CertificateId) -> u32 {
        self.attempts.lock().get(id).copied().unwrap_or(0)
    }

    /// Run sweeps at the configured interval until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            workers = self.settings.workers,
            window_days = self.manager.window().days(),
            "Starting certificate renewal scheduler"
        );

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.settings.run_on_start {
            // The first tick completes immediately
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!("Running scheduled renewal sweep");
            match self.sweep(&cancel).await {
                Ok(report) => info!(
                    selected = report.selected,
                    renewed = report.renewed,
                    failed = report.failed,
                    transient = report.transient,
                    skipped = report.skipped,
                    duration_ms = report.duration.as_millis() as u64,
                    "Renewal sweep completed"
                ),
                Err(e) => error!(error = %e, "Renewal sweep failed"),
            }
        }

        info!("Certificate renewal scheduler stopped");
    }

    /// One pass over the store
    pub async fn sweep(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, crate::storage::StorageError> {
        let started = Instant::now();
        let now = Utc::now();
        let window = self.manager.window();

        let records = self.store.list()?;
        let mut report = SweepReport {
            scanned: records.len(),
            ..Default::default()
        };

        let mut tasks = Vec::new();
        for mut record in records {
            if is_due(&record, window, now) {
                let attempt = self
                    .attempts
                    .lock()
                    .get(record.id())
                    .copied()
                    .unwrap_or(0)
                    + 1;
                tasks.push(RenewalTask {
                    domain_id: record.domain_id().clone(),
                    record,
                    attempt,
                });
            } else if !record.auto_renew() && record.mark_expired_if_due(now) {
                report.expired += 1;
                if let Err(e) = self.store.save(&record) {
                    warn!(id = %record.id(), error = %e, "Failed to persist expired status");
                }
            }
        }
        report.selected = tasks.len();

        if !tasks.is_empty() {
            info!(count = tasks.len(), "Certificates due for renewal");
        }

        let workers = Arc::new(Semaphore::new(self.settings.workers));
        let mut set = JoinSet::new();
        for task in tasks {
            let scheduler = Arc::clone(self);
            let workers = Arc::clone(&workers);
            let cancel = cancel.clone();
            set.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return TaskOutcome::Cancelled;
                };
                if cancel.is_cancelled() {
                    return TaskOutcome::Cancelled;
                }
                scheduler.execute(task, &cancel).await
            });
        }

        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Renewal task panicked");
                    TaskOutcome::Transient
                }
            };
            self.manager.metrics().record_renewal_task(outcome.as_str());
            report.count(outcome);
        }

        self.manager.metrics().record_sweep();
        report.duration = started.elapsed();
        Ok(report)
    }

    async fn execute(&self, task: RenewalTask, cancel: &CancellationToken) -> TaskOutcome {
        let id = task.record.id().clone();
        debug!(
            id = %id,
            domain_id = %task.domain_id,
            domain = %task.record.primary_domain(),
            attempt = task.attempt,
            "Renewing certificate"
        );

        let options = RenewOptions {
            force: true,
            lock: LockMode::Skip,
        };
        let (outcome, record) = match self.manager.renew(task.record, options, cancel).await {
            Ok(renewal) => (TaskOutcome::Renewed, Some(renewal.into_record())),
            Err(failure) => {
                let outcome = TaskOutcome::from_error(&failure.error);
                (outcome, failure.record.map(|r| *r))
            }
        };

        match outcome {
            TaskOutcome::Renewed | TaskOutcome::Failed => {
                self.attempts.lock().remove(&id);
                if let Some(record) = record {
                    if let Err(e) = self.store.save(&record) {
                        error!(id = %id, error = %e, "Failed to persist renewal result");
                    }
                }
            }
            TaskOutcome::Transient => {
                *self.attempts.lock().entry(id).or_insert(0) += 1;
            }
            TaskOutcome::Skipped | TaskOutcome::Cancelled => {}
        }
        outcome
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("interval", &self.settings.interval)
            .field("workers", &self.settings.workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IssuedMaterial, PrivateKeyPem};
    use chrono::Duration as ChronoDuration;

    fn issued(domain: &str, auto_renew: bool, expires_in: ChronoDuration) -> CertificateRecord {
        let now = Utc::now();
        let mut record =
            CertificateRecord::new(DomainId::new("dom"), domain, &[], false, auto_renew).unwrap();
        record
            .mark_issued(IssuedMaterial {
                certificate_pem: "cert".to_string(),
                chain_pem: String::new(),
                private_key: PrivateKeyPem::new("key"),
                issued_at: now - ChronoDuration::days(80),
                expires_at: now + expires_in,
            })
            .unwrap();
        record
    }

    #[test]
    fn test_selection_window() {
        let now = Utc::now();
        let window = RenewalWindow::default();
        let soon = issued("soon.example", true, ChronoDuration::days(10));
        let later = issued("later.example", true, ChronoDuration::days(60));

        assert!(is_due(&soon, window, now));
        assert!(!is_due(&later, window, now));

        let records = vec![soon, later];
        let due = select_due(&records, window, now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].primary_domain(), "soon.example");
    }

    #[test]
    fn test_auto_renew_off_never_selected() {
        let now = Utc::now();
        let record = issued("manual.example", false, ChronoDuration::days(-5));
        assert!(!is_due(&record, RenewalWindow::default(), now));
    }

    #[test]
    fn test_only_issued_selected() {
        let now = Utc::now();
        let mut failed =
            CertificateRecord::new(DomainId::new("dom"), "failed.example", &[], false, true)
                .unwrap();
        failed.mark_failed("rejected").unwrap();
        assert!(!is_due(&failed, RenewalWindow::default(), now));

        let pending =
            CertificateRecord::new(DomainId::new("dom"), "pending.example", &[], false, true)
                .unwrap();
        assert!(!is_due(&pending, RenewalWindow::default(), now));
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            TaskOutcome::from_error(&AcmeError::AlreadyInFlight {
                domain: "example.com".to_string()
            }),
            TaskOutcome::Skipped
        );
        assert_eq!(
            TaskOutcome::from_error(&AcmeError::transient("new_order", "503")),
            TaskOutcome::Transient
        );
        assert_eq!(
            TaskOutcome::from_error(&AcmeError::AuthorizationRejected {
                domain: "example.com".to_string(),
                reason: "bad TXT".to_string()
            }),
            TaskOutcome::Failed
        );
        assert_eq!(
            TaskOutcome::from_error(&AcmeError::Cancelled),
            TaskOutcome::Cancelled
        );
        assert_eq!(
            TaskOutcome::from_error(&AcmeError::Dns(
                crate::dns::DnsProviderError::Authentication("token expired".to_string())
            )),
            TaskOutcome::Transient
        );
    }
}
