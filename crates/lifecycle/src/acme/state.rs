//! Issuance state machine
//!
//! ```text
//! START -> ACCOUNT_READY -> ORDER_CREATED -> AUTHORIZATIONS_PENDING
//!       -> CHALLENGES_PROVISIONED -> CHALLENGES_VALIDATING -> FINALIZING
//!       -> CERTIFICATE_READY
//! ```
//!
//! `FAILED` is reachable from every non-terminal state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceState {
    Start,
    AccountReady,
    OrderCreated,
    AuthorizationsPending,
    ChallengesProvisioned,
    ChallengesValidating,
    Finalizing,
    CertificateReady,
    Failed,
}

impl IssuanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CertificateReady | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::AccountReady => "ACCOUNT_READY",
            Self::OrderCreated => "ORDER_CREATED",
            Self::AuthorizationsPending => "AUTHORIZATIONS_PENDING",
            Self::ChallengesProvisioned => "CHALLENGES_PROVISIONED",
            Self::ChallengesValidating => "CHALLENGES_VALIDATING",
            Self::Finalizing => "FINALIZING",
            Self::CertificateReady => "CERTIFICATE_READY",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceEvent {
    AccountEnsured,
    OrderPlaced,
    AuthorizationsFetched,
    ChallengesProvisioned,
    ChallengesSubmitted,
    AuthorizationsValid,
    CertificateDownloaded,
    Fail,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("event {event:?} is not valid in state {from}")]
pub struct InvalidTransition {
    pub from: IssuanceState,
    pub event: IssuanceEvent,
}

/// Pure transition function
pub fn transition(
    from: IssuanceState,
    event: IssuanceEvent,
) -> Result<IssuanceState, InvalidTransition> {
    use IssuanceEvent as E;
    use IssuanceState as S;

    let to = match (from, event) {
        (s, E::Fail) if !s.is_terminal() => S::Failed,
        (S::Start, E::AccountEnsured) => S::AccountReady,
        (S::AccountReady, E::OrderPlaced) => S::OrderCreated,
        (S::OrderCreated, E::AuthorizationsFetched) => S::AuthorizationsPending,
        (S::AuthorizationsPending, E::ChallengesProvisioned) => S::ChallengesProvisioned,
        (S::ChallengesProvisioned, E::ChallengesSubmitted) => S::ChallengesValidating,
        (S::ChallengesValidating, E::AuthorizationsValid) => S::Finalizing,
        (S::Finalizing, E::CertificateDownloaded) => S::CertificateReady,
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(to)
}

/// Running machine with its visited states
#[derive(Debug, Clone)]
pub struct IssuanceMachine {
    state: IssuanceState,
    history: Vec<(IssuanceState, DateTime<Utc>)>,
}

impl IssuanceMachine {
    pub fn new() -> Self {
        Self {
            state: IssuanceState::Start,
            history: vec![(IssuanceState::Start, Utc::now())],
        }
    }

    pub fn state(&self) -> IssuanceState {
        self.state
    }

    pub fn apply(&mut self, event: IssuanceEvent) -> Result<IssuanceState, InvalidTransition> {
        let next = transition(self.state, event)?;
        debug!(from = %self.state, to = %next, "Issuance state transition");
        self.state = next;
        self.history.push((next, Utc::now()));
        Ok(next)
    }

    /// Move to FAILED unless already terminal
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = IssuanceState::Failed;
            self.history.push((IssuanceState::Failed, Utc::now()));
        }
    }

    pub fn visited(&self) -> Vec<IssuanceState> {
        self.history.iter().map(|(s, _)| *s).collect()
    }

    pub fn reached(&self, state: IssuanceState) -> bool {
        self.history.iter().any(|(s, _)| *s == state)
    }
}

impl Default for IssuanceMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IssuanceEvent as E;
    use IssuanceState as S;

    #[test]
    fn test_happy_path() {
        let mut machine = IssuanceMachine::new();
        for event in [
            E::AccountEnsured,
            E::OrderPlaced,
            E::AuthorizationsFetched,
            E::ChallengesProvisioned,
            E::ChallengesSubmitted,
            E::AuthorizationsValid,
            E::CertificateDownloaded,
        ] {
            machine.apply(event).unwrap();
        }
        assert_eq!(machine.state(), S::CertificateReady);
        assert_eq!(machine.visited().len(), 8);
        assert!(machine.reached(S::Finalizing));
    }

    #[test]
    fn test_fail_from_any_non_terminal() {
        for state in [
            S::Start,
            S::AccountReady,
            S::OrderCreated,
            S::AuthorizationsPending,
            S::ChallengesProvisioned,
            S::ChallengesValidating,
            S::Finalizing,
        ] {
            assert_eq!(transition(state, E::Fail), Ok(S::Failed));
        }
        assert!(transition(S::Failed, E::Fail).is_err());
        assert!(transition(S::CertificateReady, E::Fail).is_err());
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(transition(S::Start, E::OrderPlaced).is_err());
        assert!(transition(S::ChallengesProvisioned, E::AuthorizationsValid).is_err());
        assert!(transition(S::AuthorizationsPending, E::CertificateDownloaded).is_err());
    }

    #[test]
    fn test_fail_is_idempotent_on_machine() {
        let mut machine = IssuanceMachine::new();
        machine.apply(E::AccountEnsured).unwrap();
        machine.fail();
        machine.fail();
        assert_eq!(machine.state(), S::Failed);
        assert_eq!(machine.visited(), vec![S::Start, S::AccountReady, S::Failed]);
    }
}
