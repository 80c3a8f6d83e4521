//! Certificate lifecycle management for certkeeper
//!
//! Obtains TLS certificates from an ACME authority with DNS-01 challenges,
//! tracks their expiry, renews them in the background, and validates,
//! revokes and exports them.
//!
//! # Module Organization
//!
//! - [`crypto`]: key pairs, CSRs, PEM and PKCS#12
//! - [`record`]: the certificate record and its status transitions
//! - [`dns`]: DNS providers and challenge record provisioning
//! - [`acme`]: certificate authorities and the issuance orchestrator
//! - [`manager`]: issue, renew, revoke, validate, health and export
//! - [`scheduler`]: periodic renewal sweeps
//! - [`validate`]: post-issuance checks and certificate inspection
//! - [`export`]: PEM and PKCS#12 export
//! - [`health`]: fleet health summaries
//! - [`storage`]: record and account credential persistence
//! - [`metrics`]: Prometheus metrics
//! - [`app`]: configuration wiring used by the binary

pub mod acme;
pub mod app;
pub mod crypto;
pub mod dns;
pub mod export;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod record;
pub mod scheduler;
pub mod storage;
pub mod validate;

pub use acme::{AcmeError, AcmeOrchestrator, IssuanceRequest, IssuanceState, LockMode};
pub use app::App;
pub use export::{ExportError, ExportFormat};
pub use health::{CertificateHealth, HealthSummary};
pub use manager::{CertificateManager, IssuanceFailure, RenewOptions, Renewal};
pub use metrics::LifecycleMetrics;
pub use record::{CertificateRecord, CertificateStatus, RenewalWindow, RevocationReason};
pub use scheduler::{RenewalScheduler, RenewalTask, SweepReport};
pub use storage::{FileRecordStore, MemoryRecordStore, RecordStore, StorageError};
pub use validate::{inspect, CertificateDetails, Validator};
