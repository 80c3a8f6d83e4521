//! ACME issuance orchestration
//!
//! Drives one issuance run through the [`IssuanceMachine`]: account, order,
//! DNS-01 challenge provisioning, validation polling, finalization and
//! download. Challenge records are torn down after every run, whether it
//! succeeded, failed or was cancelled.
//!
//! Every authority call runs under a timeout with bounded retry of transient
//! errors. At most one run per primary domain is in flight at a time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use certkeeper_common::{BackoffPolicy, RunId};
use certkeeper_config::AcmeConfig;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::authority::{AuthorizationStatus, CertificateAuthority, OrderHandle, OrderStatus};
use super::error::{AcmeError, AcmeResult};
use super::state::{IssuanceEvent, IssuanceMachine, IssuanceState};
use crate::crypto::{self, Csr, KeySpec};
use crate::dns::{
    base_domain, ChallengeEntry, ChallengeProvisioner, ChallengeSet, ChallengeStatus,
    DnsProviderError,
};
use crate::metrics::LifecycleMetrics;
use crate::record::{normalize_domain, CertificateRecord, IssuedMaterial, RevocationReason};

// ============================================================================
// Settings
// ============================================================================

/// Timeouts, retries and polling for issuance runs
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Bound on a single authority call
    pub call_timeout: Duration,
    /// Retries of a transient authority error per call
    pub call_retries: u32,
    /// Delay between retries of a failed call
    pub retry: BackoffPolicy,
    /// Authorization status polling
    pub validation: BackoffPolicy,
    /// Order status polling after finalization
    pub finalize: BackoffPolicy,
    pub key_spec: KeySpec,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            call_retries: 3,
            retry: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10)),
            validation: BackoffPolicy::POLLING,
            finalize: BackoffPolicy::POLLING,
            key_spec: KeySpec::default(),
        }
    }
}

impl From<&AcmeConfig> for OrchestratorSettings {
    fn from(config: &AcmeConfig) -> Self {
        let polling = BackoffPolicy::new(config.poll_initial_interval(), config.poll_max_interval());
        Self {
            call_timeout: config.request_timeout(),
            call_retries: config.request_retries,
            retry: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10)),
            validation: polling.with_max_elapsed(config.validation_timeout()),
            finalize: polling.with_max_elapsed(config.finalize_timeout()),
            key_spec: KeySpec::from(config.key_type),
        }
    }
}

// ============================================================================
// Per-domain exclusion
// ============================================================================

/// How a run behaves when its domain is already being issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Wait for the other run to finish (on-demand calls)
    Wait,
    /// Give up with `AlreadyInFlight` (scheduler tasks)
    Skip,
}

/// Mutual exclusion keyed by primary domain
///
/// Entries exist only while a run holds or waits for the domain.
#[derive(Debug, Default)]
pub struct DomainLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held for the duration of one run
#[derive(Debug)]
pub struct DomainGuard {
    domain: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl DomainGuard {
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Drop for DomainGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.domain, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl DomainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, domain: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(domain.to_string()).or_default().value())
    }

    fn guard(&self, domain: String, guard: OwnedMutexGuard<()>) -> DomainGuard {
        DomainGuard {
            domain,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    pub async fn acquire(&self, domain: &str) -> DomainGuard {
        let domain = domain.to_ascii_lowercase();
        let guard = self.lock_for(&domain).lock_owned().await;
        self.guard(domain, guard)
    }

    pub fn try_acquire(&self, domain: &str) -> Option<DomainGuard> {
        let domain = domain.to_ascii_lowercase();
        let guard = self.lock_for(&domain).try_lock_owned().ok()?;
        Some(self.guard(domain, guard))
    }

    /// Domains with a run holding or waiting for the lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn is_locked(&self, domain: &str) -> bool {
        self.locks
            .get(&domain.to_ascii_lowercase())
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Identifiers to issue for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    pub primary_domain: String,
    pub san_domains: Vec<String>,
    pub wildcard: bool,
}

impl IssuanceRequest {
    pub fn new(primary_domain: impl Into<String>, san_domains: Vec<String>, wildcard: bool) -> Self {
        Self {
            primary_domain: primary_domain.into(),
            san_domains,
            wildcard,
        }
    }

    /// Re-issue for an existing record's domain set
    pub fn for_record(record: &CertificateRecord) -> Self {
        Self {
            primary_domain: record.primary_domain().to_string(),
            san_domains: record.san_domains().to_vec(),
            wildcard: record.wildcard(),
        }
    }
}

/// What happened during one run
#[derive(Debug, Clone)]
pub struct IssuanceReport {
    pub run_id: RunId,
    pub visited: Vec<IssuanceState>,
    pub records_provisioned: usize,
    /// Challenge records left behind by failed teardown
    pub cleanup_failures: usize,
    pub duration: Duration,
}

/// A successful run
#[derive(Debug, Clone)]
pub struct IssuanceOutcome {
    pub material: IssuedMaterial,
    /// Identifiers in the CSR, in order
    pub san_list: Vec<String>,
    pub report: IssuanceReport,
}

/// Mutable state of one run, kept outside the driving future so cleanup
/// still sees it after cancellation.
#[derive(Debug)]
struct RunState {
    machine: IssuanceMachine,
    challenges: ChallengeSet,
    order: Option<OrderHandle>,
    records_provisioned: usize,
}

impl RunState {
    fn new() -> Self {
        Self {
            machine: IssuanceMachine::new(),
            challenges: ChallengeSet::new(),
            order: None,
            records_provisioned: 0,
        }
    }

    fn advance(&mut self, event: IssuanceEvent) -> AcmeResult<()> {
        self.machine.apply(event)?;
        Ok(())
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs issuance against a certificate authority and a DNS provisioner
#[derive(Debug)]
pub struct AcmeOrchestrator {
    authority: Arc<dyn CertificateAuthority>,
    provisioner: Arc<ChallengeProvisioner>,
    settings: OrchestratorSettings,
    locks: DomainLocks,
    metrics: Option<LifecycleMetrics>,
}

impl AcmeOrchestrator {
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        provisioner: Arc<ChallengeProvisioner>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            authority,
            provisioner,
            settings,
            locks: DomainLocks::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LifecycleMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn authority(&self) -> &Arc<dyn CertificateAuthority> {
        &self.authority
    }

    pub fn provisioner(&self) -> &Arc<ChallengeProvisioner> {
        &self.provisioner
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn locks(&self) -> &DomainLocks {
        &self.locks
    }

    /// Issue a certificate for `request`.
    ///
    /// Input is validated and the key and CSR are built before any network
    /// call. Failures after that point are wrapped in
    /// [`AcmeError::IssuanceFailed`] naming the state the run failed in.
    pub async fn issue(
        &self,
        request: &IssuanceRequest,
        mode: LockMode,
        cancel: &CancellationToken,
    ) -> AcmeResult<IssuanceOutcome> {
        let primary = normalize_domain(&request.primary_domain, false)
            .map_err(|e| AcmeError::InvalidInput(e.to_string()))?;
        let sans = request
            .san_domains
            .iter()
            .map(|san| normalize_domain(san, true))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AcmeError::InvalidInput(e.to_string()))?;

        let key = crypto::generate_key_pair(self.settings.key_spec)?;
        let csr = crypto::build_csr(&primary, &sans, request.wildcard, &key)?;

        let _guard = match mode {
            LockMode::Wait => tokio::select! {
                guard = self.locks.acquire(&primary) => guard,
                _ = cancel.cancelled() => return Err(AcmeError::Cancelled),
            },
            LockMode::Skip => self
                .locks
                .try_acquire(&primary)
                .ok_or_else(|| AcmeError::AlreadyInFlight {
                    domain: primary.clone(),
                })?,
        };

        let run_id = RunId::new();
        let span = info_span!("issuance", run_id = %run_id, domain = %primary);

        async {
            let started = Instant::now();
            info!(
                authority = self.authority.name(),
                identifiers = ?csr.san_list,
                "Starting certificate issuance"
            );

            let mut run = RunState::new();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AcmeError::Cancelled),
                result = self.drive(&csr, &mut run) => result,
            };

            let stage = run.machine.state();
            if result.is_err() {
                run.machine.fail();
            }
            let cleanup_failures = self.cleanup(&run).await;

            let report = IssuanceReport {
                run_id: run_id.clone(),
                visited: run.machine.visited(),
                records_provisioned: run.records_provisioned,
                cleanup_failures,
                duration: started.elapsed(),
            };

            match result {
                Ok(full_chain) => {
                    let material = build_material(&full_chain, &key)?;
                    info!(
                        expires_at = %material.expires_at,
                        duration_ms = report.duration.as_millis() as u64,
                        "Certificate issued"
                    );
                    Ok(IssuanceOutcome {
                        material,
                        san_list: csr.san_list.clone(),
                        report,
                    })
                }
                Err(AcmeError::Cancelled) => {
                    info!(stage = %stage, "Issuance cancelled");
                    Err(AcmeError::Cancelled)
                }
                Err(cause) => {
                    warn!(stage = %stage, error = %cause, "Issuance failed");
                    Err(AcmeError::IssuanceFailed {
                        domain: primary.clone(),
                        stage,
                        cause: Box::new(cause),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Revoke a certificate (DER) with the authority
    pub async fn revoke(&self, certificate_der: &[u8], reason: RevocationReason) -> AcmeResult<()> {
        let authority = &self.authority;
        self.call("ensure_account", || authority.ensure_account())
            .await?;
        self.call("revoke", || authority.revoke(certificate_der, reason))
            .await?;
        info!(authority = authority.name(), reason = %reason, "Certificate revoked");
        Ok(())
    }

    /// The protocol steps, each advancing the machine
    async fn drive(&self, csr: &Csr, run: &mut RunState) -> AcmeResult<String> {
        let authority = &self.authority;

        self.call("ensure_account", || authority.ensure_account())
            .await?;
        run.advance(IssuanceEvent::AccountEnsured)?;

        let order = self
            .call("new_order", || authority.new_order(&csr.san_list))
            .await?;
        run.order = Some(order.clone());
        run.advance(IssuanceEvent::OrderPlaced)?;

        let authorizations = self
            .call("authorizations", || authority.authorizations(&order))
            .await?;
        run.advance(IssuanceEvent::AuthorizationsFetched)?;

        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Valid => {
                    debug!(identifier = %authz.identifier, "Authorization already valid");
                    continue;
                }
                status if status.is_failed() => {
                    return Err(AcmeError::AuthorizationRejected {
                        domain: authz.identifier.clone(),
                        reason: authz
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("authorization is {:?}", status)),
                    });
                }
                _ => {}
            }

            let challenge = authz
                .dns_challenge
                .as_ref()
                .ok_or_else(|| AcmeError::NoDns01Challenge(authz.identifier.clone()))?;
            run.challenges.insert(ChallengeEntry::new(
                &authz.identifier,
                &challenge.token,
                &challenge.key_authorization,
                &challenge.url,
            ));
        }

        self.provision(run).await?;
        run.advance(IssuanceEvent::ChallengesProvisioned)?;

        for entry in run.challenges.iter_mut() {
            let url = entry.challenge_url.clone();
            self.call("challenge_ready", || authority.challenge_ready(&order, &url))
                .await?;
            entry.status = ChallengeStatus::Validating;
        }
        run.advance(IssuanceEvent::ChallengesSubmitted)?;

        self.await_authorizations(&order, run).await?;
        run.advance(IssuanceEvent::AuthorizationsValid)?;

        // A repeated finalize is refused once the order is processing
        self.call_with_retries("finalize", 0, || authority.finalize(&order, &csr.der))
            .await?;
        let full_chain = self.await_certificate(&order).await?;
        run.advance(IssuanceEvent::CertificateDownloaded)?;

        Ok(full_chain)
    }

    async fn provision(&self, run: &mut RunState) -> AcmeResult<()> {
        let provider = self.provisioner.provider();
        let mut checked: Vec<&str> = Vec::new();
        for entry in run.challenges.iter() {
            let domain = base_domain(&entry.identifier);
            if checked.contains(&domain) {
                continue;
            }
            if !provider.supports_domain(domain).await? {
                return Err(DnsProviderError::UnsupportedDomain {
                    domain: domain.to_string(),
                }
                .into());
            }
            checked.push(domain);
        }

        let records: Vec<(String, String)> = run
            .challenges
            .iter()
            .map(|e| (e.record_name.clone(), e.record_value.clone()))
            .collect();
        let results = self.provisioner.provision_all(&records).await;

        let mut handles = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (entry, result) in run.challenges.iter_mut().zip(results) {
            match result {
                Ok(handle) => {
                    entry.status = ChallengeStatus::Provisioned;
                    handles.push(handle);
                }
                Err(e) => {
                    warn!(identifier = %entry.identifier, error = %e, "Challenge record provisioning failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        run.records_provisioned = handles.len();

        if let Some(e) = first_error {
            return Err(e.into());
        }

        self.provisioner.wait_for_propagation(&handles).await?;
        debug!(records = handles.len(), "Challenge records provisioned");
        Ok(())
    }

    /// Poll until every authorization is valid, any is invalid, or time runs out
    async fn await_authorizations(&self, order: &OrderHandle, run: &mut RunState) -> AcmeResult<()> {
        let authority = &self.authority;
        let mut backoff = self.settings.validation.start();

        loop {
            let authorizations = self
                .call("authorizations", || authority.authorizations(order))
                .await?;

            for authz in &authorizations {
                if authz.status == AuthorizationStatus::Valid {
                    run.challenges
                        .set_status(&authz.identifier, ChallengeStatus::Valid);
                } else if authz.status.is_failed() {
                    run.challenges.mark_invalid(
                        &authz.identifier,
                        authz.error.clone().unwrap_or_default(),
                    );
                }
            }

            if let Some(rejected) = authorizations.iter().find(|a| a.status.is_failed()) {
                return Err(AcmeError::AuthorizationRejected {
                    domain: rejected.identifier.clone(),
                    reason: rejected
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("authorization is {:?}", rejected.status)),
                });
            }
            if authorizations
                .iter()
                .all(|a| a.status == AuthorizationStatus::Valid)
            {
                debug!(polls = backoff.attempts(), "All authorizations valid");
                return Ok(());
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(AcmeError::Timeout {
                    operation: "authorization polling".to_string(),
                    elapsed: backoff.elapsed(),
                });
            };
            debug!(
                pending = run.challenges.count(ChallengeStatus::Validating),
                delay_ms = delay.as_millis() as u64,
                "Authorizations pending"
            );
            sleep(delay).await;
        }
    }

    /// Poll the order until it is valid, then download the chain
    async fn await_certificate(&self, order: &OrderHandle) -> AcmeResult<String> {
        let authority = &self.authority;
        let mut backoff = self.settings.finalize.start();

        loop {
            let state = self
                .call("order_state", || authority.order_state(order))
                .await?;

            match state.status {
                OrderStatus::Valid => {
                    if let Some(pem) = self
                        .call("certificate", || authority.certificate(order))
                        .await?
                    {
                        return Ok(pem);
                    }
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::rejected(
                        "finalize",
                        state
                            .error
                            .unwrap_or_else(|| "order became invalid".to_string()),
                    ));
                }
                _ => {}
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(AcmeError::Timeout {
                    operation: "order finalization".to_string(),
                    elapsed: backoff.elapsed(),
                });
            };
            sleep(delay).await;
        }
    }

    /// Remove every challenge record this run holds and release the order
    async fn cleanup(&self, run: &RunState) -> usize {
        let mut handles = Vec::new();
        for entry in run.challenges.iter() {
            if let Some(handle) = self
                .provisioner
                .tracked(&entry.record_name, &entry.record_value)
                .await
            {
                handles.push(handle);
            }
        }

        let failures = self.provisioner.deprovision_all(&handles).await;
        if failures > 0 {
            warn!(
                failures,
                records = handles.len(),
                "Challenge cleanup incomplete"
            );
        } else if !handles.is_empty() {
            debug!(records = handles.len(), "Challenge records removed");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_cleanup_debt(failures);
        }

        if let Some(order) = &run.order {
            self.authority.release(order).await;
        }
        failures
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, call: F) -> AcmeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AcmeResult<T>>,
    {
        self.call_with_retries(operation, self.settings.call_retries, call)
            .await
    }

    /// Run an authority call under the call timeout, retrying transient errors
    async fn call_with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        max_retries: u32,
        mut call: F,
    ) -> AcmeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AcmeResult<T>>,
    {
        let mut backoff = self.settings.retry.start();
        let mut retries = 0;

        loop {
            let result = match timeout(self.settings.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AcmeError::Timeout {
                    operation: operation.to_string(),
                    elapsed: self.settings.call_timeout,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < max_retries => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(e);
                    };
                    retries += 1;
                    warn!(
                        operation,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient authority error, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn build_material(full_chain: &str, key: &rcgen::KeyPair) -> AcmeResult<IssuedMaterial> {
    let (certificate_pem, chain_pem) = crypto::split_chain(full_chain)?;
    let (_, expires_at) = crypto::certificate_validity(&certificate_pem)?;
    let issued_at = Utc::now();

    if expires_at <= issued_at {
        return Err(AcmeError::rejected(
            "certificate",
            format!("issued certificate already expired at {}", expires_at),
        ));
    }

    Ok(IssuedMaterial {
        certificate_pem,
        chain_pem,
        private_key: crypto::private_key_pem(key),
        issued_at,
        expires_at,
    })
}
