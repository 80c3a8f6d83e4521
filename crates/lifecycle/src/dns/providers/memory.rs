//! In-process DNS provider
//!
//! Keeps TXT records in a table. Used by the development authority setup
//! and as the DNS test double, so it can also inject failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::dns::provider::{DnsProvider, DnsProviderError, DnsResult};

#[derive(Debug, Clone)]
struct StoredRecord {
    id: String,
    value: String,
}

/// TXT records held in memory
#[derive(Debug, Default)]
pub struct MemoryDnsProvider {
    records: Mutex<HashMap<String, Vec<StoredRecord>>>,
    next_id: AtomicU64,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_creates: AtomicUsize,
    fail_deletes: Mutex<bool>,
    reject_creates: Mutex<Option<String>>,
    create_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    zones: Mutex<Vec<String>>,
}

impl MemoryDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `supports_domain` to these zones (default: every domain)
    pub fn with_zones(zones: &[&str]) -> Self {
        let provider = Self::default();
        *provider.zones.lock() = zones.iter().map(|z| z.to_ascii_lowercase()).collect();
        provider
    }

    /// Fail the next `count` creates with a transient API error
    pub fn fail_next_creates(&self, count: usize) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }

    /// Make every delete fail until switched off
    pub fn set_fail_deletes(&self, fail: bool) {
        *self.fail_deletes.lock() = fail;
    }

    /// Refuse every create with an authentication error until cleared
    pub fn set_reject_creates(&self, reason: Option<&str>) {
        *self.reject_creates.lock() = reason.map(str::to_string);
    }

    /// Respond to creates only after `delay`; the record exists before then
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.lock() = delay;
    }

    /// Highest number of creates seen in progress at once
    pub fn max_concurrent_creates(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Current values under a record name, in creation order
    pub fn txt_values(&self, record_name: &str) -> Vec<String> {
        self.records
            .lock()
            .get(&record_name.to_ascii_lowercase())
            .map(|records| records.iter().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Total records across all names
    pub fn record_count(&self) -> usize {
        self.records.lock().values().map(Vec::len).sum()
    }

    /// Number of create calls, including injected failures
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsProvider for MemoryDnsProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_txt_record(&self, record_name: &str, record_value: &str) -> DnsResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DnsProviderError::ApiRequest(
                "injected transient failure".to_string(),
            ));
        }
        if let Some(reason) = self.reject_creates.lock().clone() {
            return Err(DnsProviderError::Authentication(reason));
        }

        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.records
            .lock()
            .entry(record_name.to_ascii_lowercase())
            .or_default()
            .push(StoredRecord {
                id: id.clone(),
                value: record_value.to_string(),
            });

        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        debug!(record_name = %record_name, record_id = %id, "Created in-memory TXT record");
        Ok(id)
    }

    async fn delete_txt_record(&self, record_name: &str, record_id: &str) -> DnsResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        if *self.fail_deletes.lock() {
            return Err(DnsProviderError::RecordDeletion {
                record_id: record_id.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let key = record_name.to_ascii_lowercase();
        let mut records = self.records.lock();
        if let Some(list) = records.get_mut(&key) {
            list.retain(|r| r.id != record_id);
            if list.is_empty() {
                records.remove(&key);
            }
        }
        Ok(())
    }

    async fn supports_domain(&self, domain: &str) -> DnsResult<bool> {
        let zones = self.zones.lock();
        if zones.is_empty() {
            return Ok(true);
        }
        Ok(zones
            .iter()
            .any(|zone| crate::dns::provider::domain_in_zone(domain, zone)))
    }
}
