//! Wiring from configuration to a running lifecycle
//!
//! [`App`] is the calling context: it owns the record store and persists
//! what the manager returns.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use certkeeper_common::DomainId;
use certkeeper_config::Config;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::acme::{
    AcmeAuthority, AcmeOrchestrator, CertificateAuthority, DevelopmentAuthority,
    OrchestratorSettings,
};
use crate::dns::{create_provider, ChallengeProvisioner};
use crate::manager::{CertificateManager, IssuanceFailure, RenewOptions, Renewal};
use crate::metrics::LifecycleMetrics;
use crate::record::{CertificateRecord, RenewalWindow, RevocationReason};
use crate::scheduler::{RenewalScheduler, SchedulerSettings};
use crate::storage::{FileRecordStore, RecordStore};

/// Configured manager, store and scheduler settings
#[derive(Debug)]
pub struct App {
    config: Config,
    store: Arc<dyn RecordStore>,
    manager: Arc<CertificateManager>,
}

impl App {
    /// Build everything from configuration, storing records on disk
    pub fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(
            FileRecordStore::new(&config.storage.path).with_context(|| {
                format!(
                    "Failed to open certificate storage at {}",
                    config.storage.path.display()
                )
            })?,
        );
        Self::with_store(config, store)
    }

    /// Build with a caller-supplied store
    pub fn with_store(config: Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        let metrics = LifecycleMetrics::new()?;

        let authority: Arc<dyn CertificateAuthority> = if config.acme.directory.is_development() {
            Arc::new(
                DevelopmentAuthority::new().context("Failed to create development authority")?,
            )
        } else {
            let url = config
                .acme
                .directory
                .url()
                .ok_or_else(|| anyhow!("ACME directory has no URL"))?;
            Arc::new(AcmeAuthority::new(
                url,
                config.acme.email.as_deref(),
                Arc::clone(&store),
            ))
        };

        let provider =
            create_provider(&config.dns_provider).context("Failed to create DNS provider")?;
        let provisioner = ChallengeProvisioner::from_config(provider, &config.dns_provider)
            .context("Failed to configure challenge provisioning")?;

        let orchestrator = AcmeOrchestrator::new(
            authority,
            Arc::new(provisioner),
            OrchestratorSettings::from(&config.acme),
        )
        .with_metrics(metrics.clone());

        let manager = CertificateManager::new(
            Arc::new(orchestrator),
            RenewalWindow::from_days(config.renewal.window_days),
            metrics,
        );

        info!(
            authority = manager.orchestrator().authority().name(),
            dns_provider = manager.orchestrator().provisioner().provider().name(),
            window_days = config.renewal.window_days,
            "Certificate lifecycle ready"
        );

        Ok(Self {
            config,
            store,
            manager: Arc::new(manager),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<CertificateManager> {
        &self.manager
    }

    pub fn scheduler(&self) -> Arc<RenewalScheduler> {
        Arc::new(RenewalScheduler::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.store),
            SchedulerSettings::from(&self.config.renewal),
        ))
    }

    /// Look a record up by ID or primary domain
    pub fn find(&self, id_or_domain: &str) -> Result<CertificateRecord> {
        self.store
            .resolve(id_or_domain)
            .context("Failed to read certificate storage")?
            .ok_or_else(|| anyhow!("No certificate found for '{}'", id_or_domain))
    }

    pub fn list(&self) -> Result<Vec<CertificateRecord>> {
        self.store
            .list()
            .context("Failed to read certificate storage")
    }

    /// Issue and persist; a failed record is persisted too
    pub async fn issue(
        &self,
        domain_id: DomainId,
        primary_domain: &str,
        san_domains: &[String],
        wildcard: bool,
        auto_renew: bool,
        cancel: &CancellationToken,
    ) -> Result<CertificateRecord> {
        match self
            .manager
            .issue(domain_id, primary_domain, san_domains, wildcard, auto_renew, cancel)
            .await
        {
            Ok(record) => {
                self.store.save(&record).context("Failed to save certificate")?;
                Ok(record)
            }
            Err(failure) => Err(self.persist_failure(failure)),
        }
    }

    /// Renew and persist the outcome
    pub async fn renew(
        &self,
        record: CertificateRecord,
        options: RenewOptions,
        cancel: &CancellationToken,
    ) -> Result<Renewal> {
        match self.manager.renew(record, options, cancel).await {
            Ok(renewal) => {
                if renewal.is_renewed() {
                    self.store
                        .save(renewal.record())
                        .context("Failed to save renewed certificate")?;
                }
                Ok(renewal)
            }
            Err(failure) => Err(self.persist_failure(failure)),
        }
    }

    /// Revoke and persist; returns whether the certificate is now revoked
    pub async fn revoke(
        &self,
        record: &mut CertificateRecord,
        reason: RevocationReason,
    ) -> Result<bool> {
        let revoked = self.manager.revoke(record, reason).await;
        if revoked {
            self.store.save(record).context("Failed to save revoked certificate")?;
        }
        Ok(revoked)
    }

    fn persist_failure(&self, failure: IssuanceFailure) -> anyhow::Error {
        if let Some(record) = &failure.record {
            if let Err(e) = self.store.save(record) {
                return anyhow::Error::new(e).context(failure.to_string());
            }
        }
        anyhow::Error::new(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CertificateStatus;
    use certkeeper_config::create_default_config;
    use tempfile::TempDir;

    fn app() -> (TempDir, App) {
        let dir = TempDir::new().unwrap();
        let mut config = create_default_config();
        config.storage.path = dir.path().join("data");
        config.acme.key_type = certkeeper_config::KeyType::EcdsaP256;
        let app = App::from_config(config).unwrap();
        (dir, app)
    }

    #[tokio::test]
    async fn test_issue_persists_record_and_key() {
        let (_dir, app) = app();
        let record = app
            .issue(
                DomainId::new("dom_1"),
                "example.com",
                &[],
                false,
                true,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let loaded = app.find("example.com").unwrap();
        assert_eq!(loaded.id(), record.id());
        assert_eq!(loaded.status(), CertificateStatus::Issued);
        assert!(!loaded.private_key().is_empty());
        assert!(app.manager().validate(&loaded));
    }

    #[tokio::test]
    async fn test_unknown_record() {
        let (_dir, app) = app();
        assert!(app.find("missing.example").is_err());
        assert!(app.list().unwrap().is_empty());
    }
}
