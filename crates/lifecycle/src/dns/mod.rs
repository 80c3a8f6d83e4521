//! DNS-01 challenge support
//!
//! # Module Structure
//!
//! - [`provider`]: `DnsProvider` trait and errors
//! - [`providers`]: Cloudflare, webhook and in-memory implementations
//! - [`credentials`]: API credential loading
//! - [`challenge`]: per-run challenge bookkeeping
//! - [`provisioner`]: idempotent record provisioning with retry
//! - [`propagation`]: optional resolver-side visibility check

pub mod challenge;
pub mod credentials;
pub mod propagation;
pub mod provider;
pub mod providers;
pub mod provisioner;

pub use challenge::{dns01_record_value, ChallengeEntry, ChallengeSet, ChallengeStatus};
pub use credentials::{load_credentials, Credentials};
pub use propagation::{PropagationChecker, PropagationConfig};
pub use provider::{
    base_domain, challenge_record_fqdn, DnsProvider, DnsProviderError, DnsResult,
    ACME_CHALLENGE_RECORD, CHALLENGE_TTL,
};
pub use providers::{create_provider, CloudflareProvider, MemoryDnsProvider, WebhookProvider};
pub use provisioner::{ChallengeProvisioner, ProvisionHandle};
