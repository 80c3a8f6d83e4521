//! Common utilities and types for certkeeper
//!
//! Shared by the configuration crate and the certificate lifecycle core:
//!
//! - [`ids`]: type-safe identifier newtypes
//! - [`backoff`]: exponential backoff with a bounded total budget
//! - [`observability`]: tracing subscriber setup for binaries

pub mod backoff;
pub mod ids;
pub mod observability;

pub use backoff::{Backoff, BackoffPolicy};
pub use ids::{CertificateId, DomainId, RunId};
pub use observability::{init_tracing, LogFormat};
