//! Client-side checks for account registration.

use crate::{AuthError, AuthResult};
use serde_json::{json, Value};
use std::fmt;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Sign-up form contents.
#[derive(Clone)]
pub struct RegistrationProfile {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

impl RegistrationProfile {
    /// Reject the profile before it reaches the backend.
    pub fn validate(&self) -> AuthResult<()> {
        if self.username.trim().is_empty() {
            return Err(AuthError::Validation("Username is required".to_string()));
        }
        if !self.email.contains('@') {
            return Err(AuthError::Validation(
                "Please enter a valid email address".to_string(),
            ));
        }
        if self.password != self.password_confirmation {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        Ok(())
    }

    /// Body sent to the registration endpoint. The confirmation stays local.
    pub(crate) fn to_request_body(&self) -> Value {
        json!({
            "username": self.username.trim(),
            "email": self.email.trim(),
            "password": self.password,
        })
    }
}

impl fmt::Debug for RegistrationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationProfile")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}
