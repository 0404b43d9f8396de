//! Authentication error types.

use leadgen_config::CoreError;
use thiserror::Error;
use token_store::StorageError;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Backend rejected the supplied credentials or refresh token
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Input rejected before or by the backend
    #[error("{0}")]
    Validation(String),

    /// No response from the backend (connect failure, timeout, reset)
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Backend answered with a 5xx status
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Access token can no longer be renewed
    #[error("Session expired")]
    SessionExpired,

    /// A protected call was rejected and the session could not be recovered
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend refused the request with another 4xx status
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Backend answered 2xx with a body we cannot use
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// No session to act on
    #[error("Not logged in")]
    NotLoggedIn,

    /// The session manager was shut down
    #[error("Session manager has been shut down")]
    SessionClosed,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<CoreError> for AuthError {
    fn from(err: CoreError) -> Self {
        AuthError::Config(err.to_string())
    }
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors are network failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::NetworkFailure(_) | AuthError::ServerError { .. }
        )
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials(message)
            | AuthError::Validation(message)
            | AuthError::Unauthorized(message) => message.clone(),
            AuthError::Rejected { message, .. } => message.clone(),
            AuthError::ServerError { message, .. } if !message.trim().is_empty() => {
                message.clone()
            }
            AuthError::ServerError { .. } => {
                "The server encountered an error. Please try again later.".to_string()
            }
            AuthError::NetworkFailure(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            AuthError::SessionExpired | AuthError::NotLoggedIn => {
                "You are not logged in. Please sign in again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
