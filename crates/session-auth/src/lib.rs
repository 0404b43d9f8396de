//! Session and token management for the leadgen client.
//!
//! This crate provides:
//! - An explicit FSM for the session lifecycle
//! - Login, registration, refresh, and revocation against the backend
//! - A session manager with single-flight token refresh
//! - An authorized request pipeline that retries once after a refresh

mod authenticator;
mod claims;
mod error;
mod pipeline;
mod session;
mod session_fsm;
mod transport;
mod validation;

#[cfg(test)]
mod tests;

pub use authenticator::{Authenticator, Credentials, LoginOutcome, RefreshedTokens};
pub use claims::TokenClaims;
pub use error::{AuthError, AuthResult};
pub use pipeline::AuthorizedClient;
pub use session::{SessionManager, SessionStateCallback};
pub use session_fsm::session_machine;
pub use session_fsm::{
    RefreshConfig, SessionMachine, SessionMachineInput, SessionMachineState, SessionState,
    SessionStateChanged, SessionStatus,
};
pub use transport::{
    extract_error_message, ApiRequest, ApiResponse, ApiTransport, HttpTransport, Method,
    RequestBody,
};
pub use validation::{RegistrationProfile, MIN_PASSWORD_LENGTH};
