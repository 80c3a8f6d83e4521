//! ACME certificate issuance
//!
//! # Module Organization
//!
//! - [`authority`]: the pluggable certificate authority interface
//! - [`instant`]: production authority over `instant-acme`
//! - [`development`]: in-process authority signing from a local root
//! - [`state`]: the issuance state machine
//! - [`orchestrator`]: drives one issuance run end to end
//! - [`error`]: error types and transient/permanent classification

pub mod authority;
pub mod development;
pub mod error;
pub mod instant;
pub mod orchestrator;
pub mod state;

pub use authority::{
    AuthorizationInfo, AuthorizationStatus, CertificateAuthority, DnsChallenge, OrderHandle,
    OrderState, OrderStatus,
};
pub use development::DevelopmentAuthority;
pub use error::{AcmeError, AcmeResult};
pub use instant::AcmeAuthority;
pub use orchestrator::{
    AcmeOrchestrator, DomainGuard, DomainLocks, IssuanceOutcome, IssuanceReport,
    IssuanceRequest, LockMode, OrchestratorSettings,
};
pub use state::{transition, InvalidTransition, IssuanceEvent, IssuanceMachine, IssuanceState};
