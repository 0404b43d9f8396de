//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                 ┌──────────────────┐
//!     (initial) ──│  Authenticating  │◄─────────────┐
//!                 └───┬──────────┬───┘              │
//!  SessionRestored /  │          │ NoSession /      │ LoginAttempt
//!  LoginSuccess       │          │ LoginFailed /    │
//!                     ▼          │ Logout           │
//!          ┌─────────────────┐   │         ┌────────┴────────┐
//!          │  Authenticated  │   └────────►│ Unauthenticated │
//!          └───┬─────────▲───┘             └────────▲────────┘
//!  TokenExpired│         │RefreshSuccess            │
//!              ▼         │                          │
//!          ┌─────────────┴───┐  RefreshFailed /     │
//!          │   Refreshing    │──Logout──────────────┘
//!          └─────────────────┘
//! ```
//!
//! `Logout` is also accepted from `Authenticated`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use token_store::UserIdentity;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Authenticating)

    Authenticating => {
        SessionRestored => Authenticated,
        NoSession => Unauthenticated,
        LoginSuccess => Authenticated,
        LoginFailed => Unauthenticated,
        Logout => Unauthenticated
    },
    Unauthenticated => {
        LoginAttempt => Authenticating
    },
    Authenticated => {
        TokenExpired => Refreshing,
        Logout => Unauthenticated
    },
    Refreshing => {
        RefreshSuccess => Authenticated,
        RefreshRetry => Refreshing,
        RefreshFailed => Unauthenticated,
        Logout => Unauthenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Data-less view of the machine state, used in logs and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

impl SessionStatus {
    /// Returns true while a token pair is considered live.
    pub fn has_session(&self) -> bool {
        matches!(self, SessionStatus::Authenticated | SessionStatus::Refreshing)
    }

    /// Returns true if the state is in-progress rather than settled.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionStatus::Authenticating | SessionStatus::Refreshing)
    }
}

impl From<&SessionMachineState> for SessionStatus {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionMachineState::Authenticating => SessionStatus::Authenticating,
            SessionMachineState::Authenticated => SessionStatus::Authenticated,
            SessionMachineState::Refreshing => SessionStatus::Refreshing,
        }
    }
}

/// The session as seen by consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    /// Login in flight, or startup restoration not yet run.
    Authenticating,
    Authenticated(UserIdentity),
    Refreshing,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionState::Authenticating => SessionStatus::Authenticating,
            SessionState::Authenticated(_) => SessionStatus::Authenticated,
            SessionState::Refreshing => SessionStatus::Refreshing,
        }
    }
}

/// Configuration for retry behavior during token refresh.
///
/// Only the refresh exchange retries on its own. A network failure or 5xx
/// from any other request is returned to the caller, which decides whether
/// to try again. Giving up on a refresh ends the session, so transient
/// refresh failures are retried here. `max_retries: 1` makes a single attempt.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl From<&leadgen_config::Config> for RefreshConfig {
    fn from(config: &leadgen_config::Config) -> Self {
        Self {
            max_retries: config.refresh_max_retries,
            initial_delay_ms: config.refresh_initial_delay_ms,
            max_delay_ms: config.refresh_max_delay_ms,
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Attempts to make, never fewer than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Payload delivered to the state callback on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub state: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated() -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoSession).unwrap();
        machine.consume(&SessionMachineInput::LoginAttempt).unwrap();
        machine.consume(&SessionMachineInput::LoginSuccess).unwrap();
        machine
    }

    #[test]
    fn test_initial_state_is_authenticating() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Authenticating);
    }

    #[test]
    fn test_restore_flow() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::SessionRestored).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);

        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoSession).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Unauthenticated);
    }

    #[test]
    fn test_login_flow() {
        let machine = authenticated();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_login_failure_returns_to_unauthenticated() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoSession).unwrap();
        machine.consume(&SessionMachineInput::LoginAttempt).unwrap();
        machine.consume(&SessionMachineInput::LoginFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Unauthenticated);
    }

    #[test]
    fn test_refresh_flow() {
        let mut machine = authenticated();

        machine.consume(&SessionMachineInput::TokenExpired).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);

        machine.consume(&SessionMachineInput::RefreshRetry).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);

        machine.consume(&SessionMachineInput::RefreshSuccess).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_refresh_failure_ends_session() {
        let mut machine = authenticated();
        machine.consume(&SessionMachineInput::TokenExpired).unwrap();
        machine.consume(&SessionMachineInput::RefreshFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Unauthenticated);
    }

    #[test]
    fn test_logout_accepted_while_refreshing() {
        let mut machine = authenticated();
        machine.consume(&SessionMachineInput::TokenExpired).unwrap();
        machine.consume(&SessionMachineInput::Logout).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Unauthenticated);
    }

    #[test]
    fn test_invalid_transitions_return_error() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoSession).unwrap();

        assert!(machine.consume(&SessionMachineInput::Logout).is_err());
        assert!(machine.consume(&SessionMachineInput::LoginSuccess).is_err());
        assert!(machine.consume(&SessionMachineInput::TokenExpired).is_err());

        // A second login cannot start while one is in flight
        machine.consume(&SessionMachineInput::LoginAttempt).unwrap();
        assert!(machine.consume(&SessionMachineInput::LoginAttempt).is_err());
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(
            SessionStatus::from(&SessionMachineState::Refreshing),
            SessionStatus::Refreshing
        );
        assert!(SessionStatus::Refreshing.has_session());
        assert!(SessionStatus::Authenticated.has_session());
        assert!(!SessionStatus::Authenticating.has_session());
        assert!(SessionStatus::Authenticating.is_transient());
        assert!(!SessionStatus::Unauthenticated.is_transient());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let payload = SessionStateChanged {
            state: SessionStatus::Unauthenticated,
            user_id: None,
            username: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "unauthenticated" }));
    }

    #[test]
    fn test_refresh_config_delay_exponential_backoff() {
        let config = RefreshConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(5000));
        assert_eq!(config.delay_for_attempt(80), Duration::from_millis(5000));
    }

    #[test]
    fn test_refresh_config_from_config() {
        let mut config = leadgen_config::Config::default();
        config.refresh_max_retries = 0;
        let refresh = RefreshConfig::from(&config);
        assert_eq!(refresh.attempts(), 1);
        assert_eq!(refresh.initial_delay_ms, 500);
    }
}
