//! Credential and token exchanges with the backend.

use crate::claims::TokenClaims;
use crate::transport::{ApiRequest, ApiResponse, ApiTransport};
use crate::validation::RegistrationProfile;
use crate::{AuthError, AuthResult};
use leadgen_config::{Config, Endpoints};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use token_store::{TokenPair, UserIdentity};
use tracing::{debug, warn};

/// Login form contents. Never persisted.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub user: UserIdentity,
}

/// Result of a successful refresh. `refresh` is set when the backend rotated it.
#[derive(Clone)]
pub struct RefreshedTokens {
    pub access: String,
    pub refresh: Option<String>,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access", &"[redacted]")
            .field("rotated", &self.refresh.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenFields {
    #[serde(default, alias = "accessToken", alias = "access_token")]
    access: Option<String>,
    #[serde(default, alias = "refreshToken", alias = "refresh_token")]
    refresh: Option<String>,
}

/// Accepts `{access, refresh}`, `{user, tokens: {access, refresh}}` and
/// `{accessToken, refreshToken, user}`.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(flatten)]
    top_level: TokenFields,
    #[serde(default)]
    tokens: Option<TokenFields>,
    #[serde(default)]
    user: Option<UserIdentity>,
}

impl LoginResponse {
    fn into_parts(self) -> (Option<String>, Option<String>, Option<UserIdentity>) {
        let nested = self.tokens.unwrap_or_default();
        let access = nested.access.or(self.top_level.access);
        let refresh = nested.refresh.or(self.top_level.refresh);
        (access, refresh, self.user)
    }
}

/// Speaks the login, registration, refresh, and revoke endpoints.
pub struct Authenticator {
    transport: Arc<dyn ApiTransport>,
    endpoints: Endpoints,
    identifier_field: String,
}

impl Authenticator {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        endpoints: Endpoints,
        identifier_field: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            endpoints,
            identifier_field: identifier_field.into(),
        }
    }

    pub fn from_config(transport: Arc<dyn ApiTransport>, config: &Config) -> Self {
        Self::new(
            transport,
            config.endpoints.clone(),
            config.identifier_field.clone(),
        )
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn has_revoke_endpoint(&self) -> bool {
        self.endpoints.revoke.is_some()
    }

    /// Exchange credentials for a token pair and an identity.
    pub async fn login(&self, credentials: &Credentials) -> AuthResult<LoginOutcome> {
        let mut body = Map::new();
        body.insert(
            self.identifier_field.clone(),
            Value::String(credentials.identifier.clone()),
        );
        body.insert(
            "password".to_string(),
            Value::String(credentials.password.clone()),
        );

        debug!(identifier = %credentials.identifier, "Attempting login");
        let response = self
            .transport
            .execute(ApiRequest::post(&self.endpoints.login).json(Value::Object(body)))
            .await?;

        if !response.is_success() {
            warn!(status = response.status, "Login rejected");
            return Err(credential_error(&response, "Invalid username or password"));
        }

        let (access, refresh, user) = response.parse::<LoginResponse>()?.into_parts();
        let access = access
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("login response has no access token".to_string()))?;
        let refresh = refresh
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("login response has no refresh token".to_string()))?;

        let user = user
            .or_else(|| TokenClaims::decode(&access).and_then(|claims| claims.identity()))
            .map(|mut user| {
                if user.username.is_empty() && user.email.as_deref() != Some(&credentials.identifier) {
                    user.username = credentials.identifier.clone();
                }
                user
            })
            .unwrap_or_else(|| UserIdentity::from_identifier(&credentials.identifier));

        Ok(LoginOutcome {
            tokens: TokenPair::new(access, refresh),
            user,
        })
    }

    /// Create an account. Validation runs first; nothing is sent for an
    /// invalid profile. Never establishes a session.
    pub async fn register(&self, profile: &RegistrationProfile) -> AuthResult<UserIdentity> {
        profile.validate()?;

        debug!(username = %profile.username, "Registering account");
        let response = self
            .transport
            .execute(ApiRequest::post(&self.endpoints.register).json(profile.to_request_body()))
            .await?;

        match response.status {
            200..=299 => {}
            400 => {
                return Err(AuthError::Validation(
                    response.error_message("Registration failed"),
                ))
            }
            500..=599 => {
                return Err(AuthError::ServerError {
                    status: response.status,
                    message: response.error_message("Registration failed"),
                })
            }
            status => {
                return Err(AuthError::Rejected {
                    status,
                    message: response.error_message("Registration failed"),
                })
            }
        }

        let body: Value = response.parse()?;
        let user_value = match body.get("user") {
            Some(user) if user.is_object() => user.clone(),
            _ => body,
        };

        let mut user: UserIdentity = match user_value {
            Value::Object(_) => serde_json::from_value(user_value)
                .map_err(|e| AuthError::MalformedResponse(e.to_string()))?,
            _ => UserIdentity::from_identifier(&profile.username),
        };
        if user.username.is_empty() {
            user.username = profile.username.trim().to_string();
        }
        if user.email.is_none() {
            user.email = Some(profile.email.trim().to_string());
        }
        Ok(user)
    }

    /// Trade a refresh token for a new access token.
    ///
    /// 400/401/403 mean the refresh token itself is no good and are terminal.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        let response = self
            .transport
            .execute(
                ApiRequest::post(&self.endpoints.refresh).json(json!({ "refresh": refresh_token })),
            )
            .await?;

        if !response.is_success() {
            return Err(credential_error(&response, "Token is invalid or expired"));
        }

        let fields: TokenFields = response.parse()?;
        let access = fields
            .access
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("refresh response has no access token".to_string()))?;

        Ok(RefreshedTokens {
            access,
            refresh: fields.refresh.filter(|t| !t.is_empty()),
        })
    }

    /// Ask the backend to revoke a refresh token. A no-op without a revoke endpoint.
    pub async fn revoke(&self, refresh_token: &str) -> AuthResult<()> {
        let Some(path) = &self.endpoints.revoke else {
            return Ok(());
        };

        let response = self
            .transport
            .execute(ApiRequest::post(path).json(json!({ "refresh": refresh_token })))
            .await?;
        response.into_json().map(|_| ())
    }
}

/// Map a failed credential exchange onto the error taxonomy.
fn credential_error(response: &ApiResponse, fallback: &str) -> AuthError {
    let message = response.error_message(fallback);
    match response.status {
        400 | 401 | 403 => AuthError::InvalidCredentials(message),
        500..=599 => AuthError::ServerError {
            status: response.status,
            message,
        },
        status => AuthError::Rejected { status, message },
    }
}
