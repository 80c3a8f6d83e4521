//! Challenge record provisioning
//!
//! Wraps a [`DnsProvider`] with idempotent provision/deprovision, bounded
//! retry of transient failures and an optional propagation pre-check.

use std::sync::Arc;
use std::time::Duration;

use certkeeper_common::BackoffPolicy;
use certkeeper_config::DnsProviderConfig;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

use super::propagation::{PropagationChecker, PropagationConfig};
use super::provider::{DnsProvider, DnsProviderError, DnsResult};

/// A record created by [`ChallengeProvisioner::provision`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionHandle {
    pub record_name: String,
    pub record_value: String,
    pub record_id: String,
}

type SlotKey = (String, String);

/// Provider record ID per (name, value); `None` once deprovisioned
type Slot = Arc<Mutex<Option<String>>>;

/// Idempotent challenge record manager
#[derive(Debug)]
pub struct ChallengeProvisioner {
    provider: Arc<dyn DnsProvider>,
    slots: DashMap<SlotKey, Slot>,
    retry: BackoffPolicy,
    max_retries: u32,
    propagation: Option<PropagationChecker>,
}

impl ChallengeProvisioner {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            provider,
            slots: DashMap::new(),
            retry: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(8))
                .with_max_elapsed(Duration::from_secs(60)),
            max_retries: 3,
            propagation: None,
        }
    }

    /// Build from configuration, including the optional propagation check
    pub fn from_config(
        provider: Arc<dyn DnsProvider>,
        config: &DnsProviderConfig,
    ) -> DnsResult<Self> {
        let mut provisioner = Self::new(provider).with_max_retries(config.provision_retries);
        if config.propagation.enabled {
            let checker =
                PropagationChecker::with_config(PropagationConfig::try_from(&config.propagation)?)?;
            provisioner = provisioner.with_propagation(checker);
        }
        Ok(provisioner)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, policy: BackoffPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_propagation(mut self, checker: PropagationChecker) -> Self {
        self.propagation = Some(checker);
        self
    }

    pub fn provider(&self) -> &Arc<dyn DnsProvider> {
        &self.provider
    }

    /// Records currently held by this provisioner
    pub fn active_records(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().try_lock().map(|id| id.is_some()).unwrap_or(true))
            .count()
    }

    fn key(record_name: &str, record_value: &str) -> SlotKey {
        (record_name.to_ascii_lowercase(), record_value.to_string())
    }

    /// Slots held by this provisioner, including ones still being created
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Create a TXT record, or return the existing one for the same name and value.
    ///
    /// The provider call runs on its own task while holding the slot, so a
    /// caller dropped mid-create still leaves the record ID in the slot for
    /// [`tracked`](Self::tracked) to find.
    pub async fn provision(&self, record_name: &str, record_value: &str) -> DnsResult<ProvisionHandle> {
        let key = Self::key(record_name, record_value);
        let slot = self.slots.entry(key.clone()).or_default().clone();
        let mut guard = Arc::clone(&slot).lock_owned().await;

        if let Some(id) = guard.as_ref() {
            debug!(record_name = %record_name, record_id = %id, "Challenge record already provisioned");
            return Ok(ProvisionHandle {
                record_name: record_name.to_string(),
                record_value: record_value.to_string(),
                record_id: id.clone(),
            });
        }

        let provider = Arc::clone(&self.provider);
        let (retry, max_retries) = (self.retry, self.max_retries);
        let (name, value) = (record_name.to_string(), record_value.to_string());
        let task = tokio::spawn(async move {
            let record_id = retry_provider_call(retry, max_retries, "create", &name, || {
                provider.create_txt_record(&name, &value)
            })
            .await?;
            info!(
                provider = provider.name(),
                record_name = %name,
                record_id = %record_id,
                "Provisioned challenge record"
            );
            *guard = Some(record_id.clone());
            Ok::<_, DnsProviderError>(record_id)
        }
        .in_current_span());

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(DnsProviderError::ApiRequest(format!(
                "record creation task failed: {e}"
            ))),
        };

        match result {
            Ok(record_id) => Ok(ProvisionHandle {
                record_name: record_name.to_string(),
                record_value: record_value.to_string(),
                record_id,
            }),
            Err(e) => {
                // Drop the empty slot unless another caller is waiting on it
                self.slots.remove_if(&key, |_, held| {
                    Arc::ptr_eq(held, &slot) && Arc::strong_count(held) == 2
                });
                Err(e)
            }
        }
    }

    /// Provision several records concurrently
    ///
    /// Results are returned in input order.
    pub async fn provision_all(
        &self,
        records: &[(String, String)],
    ) -> Vec<DnsResult<ProvisionHandle>> {
        join_all(
            records
                .iter()
                .map(|(name, value)| self.provision(name, value)),
        )
        .await
    }

    /// Handle of a record this provisioner currently holds for (name, value)
    pub async fn tracked(&self, record_name: &str, record_value: &str) -> Option<ProvisionHandle> {
        let slot = self
            .slots
            .get(&Self::key(record_name, record_value))
            .map(|s| Arc::clone(s.value()))?;
        let record_id = slot.lock().await.clone()?;
        Some(ProvisionHandle {
            record_name: record_name.to_string(),
            record_value: record_value.to_string(),
            record_id,
        })
    }

    /// Remove a record; an already-absent record succeeds
    pub async fn deprovision(&self, handle: &ProvisionHandle) -> DnsResult<()> {
        let key = Self::key(&handle.record_name, &handle.record_value);
        let slot = self.slots.get(&key).map(|s| Arc::clone(s.value()));

        let Some(slot) = slot else {
            // Not tracked here; the provider treats unknown IDs as deleted
            return self
                .provider
                .delete_txt_record(&handle.record_name, &handle.record_id)
                .await;
        };

        let mut guard = slot.lock().await;
        let Some(record_id) = guard.clone() else {
            return Ok(());
        };

        let provider = &self.provider;
        self.with_retry("delete", &handle.record_name, || {
            provider.delete_txt_record(&handle.record_name, &record_id)
        })
        .await?;

        *guard = None;
        drop(guard);
        self.slots.remove(&key);

        debug!(record_name = %handle.record_name, record_id = %record_id, "Deprovisioned challenge record");
        Ok(())
    }

    /// Remove every record, logging failures
    ///
    /// Returns the number of records that could not be removed.
    pub async fn deprovision_all(&self, handles: &[ProvisionHandle]) -> usize {
        let results = join_all(handles.iter().map(|h| self.deprovision(h))).await;

        let mut failures = 0;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                failures += 1;
                warn!(
                    record_name = %handle.record_name,
                    record_id = %handle.record_id,
                    error = %e,
                    "Failed to remove challenge record, leaving cleanup debt"
                );
            }
        }
        failures
    }

    /// Wait for all records to become visible, if a checker is configured
    pub async fn wait_for_propagation(&self, handles: &[ProvisionHandle]) -> DnsResult<()> {
        let Some(checker) = &self.propagation else {
            return Ok(());
        };

        let results = join_all(
            handles
                .iter()
                .map(|h| checker.wait_for_propagation(&h.record_name, &h.record_value)),
        )
        .await;
        results.into_iter().collect()
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, record_name: &str, call: F) -> DnsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = DnsResult<T>>,
    {
        retry_provider_call(self.retry, self.max_retries, op, record_name, call).await
    }
}

/// Repeat a provider call while it fails with a retryable error
async fn retry_provider_call<T, F, Fut>(
    policy: BackoffPolicy,
    max_retries: u32,
    op: &str,
    record_name: &str,
    mut call: F,
) -> DnsResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = DnsResult<T>>,
{
    let mut backoff = policy.start();
    let mut retries = 0;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retries < max_retries => {
                let Some(delay) = backoff.next_delay() else {
                    return Err(e);
                };
                retries += 1;
                warn!(
                    op,
                    record_name = %record_name,
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient DNS provider error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
