//! ACME error types

use std::time::Duration;
use thiserror::Error;

use super::state::{InvalidTransition, IssuanceState};
use crate::crypto::CryptoError;
use crate::dns::DnsProviderError;
use crate::record::RecordError;

/// Result alias for authority and orchestration calls
pub type AcmeResult<T> = Result<T, AcmeError>;

/// Errors that can occur during ACME operations
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Malformed domain, empty SAN set and similar; rejected before any network call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authority or network failure that may succeed on retry
    #[error("Transient error during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// A call or polling loop ran out of time
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// The authority marked an authorization invalid
    #[error("Authorization rejected for '{domain}': {reason}")]
    AuthorizationRejected { domain: String, reason: String },

    /// The authority refused a request permanently
    #[error("Authority rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    /// An authorization offered no DNS-01 challenge
    #[error("No DNS-01 challenge available for '{0}'")]
    NoDns01Challenge(String),

    /// Order handle not known to the authority adapter
    #[error("Unknown order '{0}'")]
    UnknownOrder(String),

    /// A run for this domain is already in progress
    #[error("Issuance already in flight for '{domain}'")]
    AlreadyInFlight { domain: String },

    /// The run was cancelled (scheduler shutdown)
    #[error("Issuance cancelled")]
    Cancelled,

    /// Terminal failure of one orchestration run
    #[error("Issuance failed for '{domain}' at {stage}: {cause}")]
    IssuanceFailed {
        domain: String,
        stage: IssuanceState,
        #[source]
        cause: Box<AcmeError>,
    },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("DNS provider error: {0}")]
    Dns(#[from] DnsProviderError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Account credentials could not be loaded or saved
    #[error("Account storage error: {0}")]
    AccountStorage(String),

    #[error(transparent)]
    StateMachine(#[from] InvalidTransition),
}

impl AcmeError {
    pub fn transient(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Whether a later attempt may succeed without operator action.
    ///
    /// Anything that is not a rejection by the authority or bad input counts:
    /// DNS provider, account storage and local record failures leave the
    /// current certificate in service and are retried on a later sweep.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Cancelled | Self::AlreadyInFlight { .. } => false,
            Self::IssuanceFailed { cause, .. } => cause.is_transient(),
            other => !other.is_permanent(),
        }
    }

    /// Whether the same call is worth repeating within one run
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => true,
            Self::Dns(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the failure should mark the record FAILED
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidInput(_)
            | Self::AuthorizationRejected { .. }
            | Self::Rejected { .. }
            | Self::NoDns01Challenge(_) => true,
            Self::IssuanceFailed { cause, .. } => cause.is_permanent(),
            _ => false,
        }
    }

    /// The innermost cause, unwrapping `IssuanceFailed`
    pub fn root_cause(&self) -> &AcmeError {
        match self {
            Self::IssuanceFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self.root_cause() {
            Self::InvalidInput(_) => "invalid_input",
            Self::Transient { .. } => "transient",
            Self::Timeout { .. } => "timeout",
            Self::AuthorizationRejected { .. } => "authorization_rejected",
            Self::Rejected { .. } => "rejected",
            Self::NoDns01Challenge(_) => "no_dns01_challenge",
            Self::UnknownOrder(_) => "unknown_order",
            Self::AlreadyInFlight { .. } => "already_in_flight",
            Self::Cancelled => "cancelled",
            Self::IssuanceFailed { .. } => "issuance_failed",
            Self::Crypto(_) => "crypto",
            Self::Dns(_) => "dns",
            Self::Record(_) => "record",
            Self::AccountStorage(_) => "account_storage",
            Self::StateMachine(_) => "state_machine",
        }
    }
}

/// Problem types that are worth retrying
const TRANSIENT_PROBLEMS: &[&str] = &[
    "urn:ietf:params:acme:error:badNonce",
    "urn:ietf:params:acme:error:rateLimited",
    "urn:ietf:params:acme:error:serverInternal",
];

/// Classify an `instant-acme` error for `operation`
pub(crate) fn classify_acme_error(operation: &str, e: instant_acme::Error) -> AcmeError {
    match e {
        instant_acme::Error::Api(problem) => {
            let server_side = problem.status.map(|s| s >= 500).unwrap_or(false);
            let transient_type = problem
                .r#type
                .as_deref()
                .map(|t| TRANSIENT_PROBLEMS.contains(&t))
                .unwrap_or(false);
            let message = problem
                .detail
                .clone()
                .or_else(|| problem.r#type.clone())
                .unwrap_or_else(|| "unspecified problem".to_string());

            if server_side || transient_type {
                AcmeError::transient(operation, message)
            } else {
                AcmeError::rejected(operation, message)
            }
        }
        other => AcmeError::transient(operation, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AcmeError::transient("new_order", "503").is_transient());
        assert!(AcmeError::Timeout {
            operation: "poll".to_string(),
            elapsed: Duration::from_secs(120)
        }
        .is_transient());

        let rejected = AcmeError::AuthorizationRejected {
            domain: "example.com".to_string(),
            reason: "incorrect TXT record".to_string(),
        };
        assert!(rejected.is_permanent());
        assert!(!rejected.is_transient());

        assert!(AcmeError::InvalidInput("bad".to_string()).is_permanent());
        assert!(!AcmeError::Cancelled.is_permanent());
        assert!(!AcmeError::Cancelled.is_transient());
    }

    #[test]
    fn test_issuance_failed_delegates_to_cause() {
        let err = AcmeError::IssuanceFailed {
            domain: "example.com".to_string(),
            stage: IssuanceState::ChallengesProvisioned,
            cause: Box::new(AcmeError::Dns(DnsProviderError::ApiRequest("502".to_string()))),
        };
        assert!(err.is_transient());
        assert!(!err.is_permanent());
        assert_eq!(err.kind(), "dns");
        assert!(err.to_string().contains("CHALLENGES_PROVISIONED"));
    }

    #[test]
    fn test_provider_and_storage_failures_are_retried() {
        let local = [
            AcmeError::Dns(DnsProviderError::Authentication("token expired".to_string())),
            AcmeError::Dns(DnsProviderError::UnsupportedDomain {
                domain: "example.org".to_string(),
            }),
            AcmeError::AccountStorage("permission denied".to_string()),
            AcmeError::UnknownOrder("order-9".to_string()),
        ];
        for err in local {
            assert!(err.is_transient(), "{err}");
            assert!(!err.is_permanent(), "{err}");
        }

        let wrapped = AcmeError::IssuanceFailed {
            domain: "example.com".to_string(),
            stage: IssuanceState::ChallengesProvisioned,
            cause: Box::new(AcmeError::Dns(DnsProviderError::Authentication(
                "token expired".to_string(),
            ))),
        };
        assert!(wrapped.is_transient());
        assert!(!wrapped.is_permanent());

        assert!(!AcmeError::AccountStorage("disk full".to_string()).is_retryable());
        assert!(AcmeError::rejected("new_order", "rejectedIdentifier").is_permanent());
        assert!(AcmeError::NoDns01Challenge("example.com".to_string()).is_permanent());
        assert!(!AcmeError::AlreadyInFlight {
            domain: "example.com".to_string()
        }
        .is_transient());
    }
}
