//! High-level API for the persisted session.

use crate::{KeyValueStorage, StorageError, StorageKeys, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh token pair. Both values are opaque to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .finish()
    }
}

/// User id as sent by the backend, which may be numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

/// The signed-in user as far as the client knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_json::Value>,
}

impl UserIdentity {
    /// Minimal identity built from the identifier the user signed in with.
    pub fn from_identifier(identifier: &str) -> Self {
        Self {
            id: None,
            username: identifier.to_string(),
            email: identifier.contains('@').then(|| identifier.to_string()),
            role: None,
            preferences: None,
        }
    }

    /// Name to show in the UI.
    pub fn display_name(&self) -> &str {
        if !self.username.is_empty() {
            return &self.username;
        }
        self.email.as_deref().unwrap_or("unknown user")
    }
}

/// Durable session persistence on top of a [`KeyValueStorage`] backend.
pub struct TokenStore {
    storage: Box<dyn KeyValueStorage>,
}

impl TokenStore {
    pub fn new(storage: Box<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Persist a token pair. The identity is only written when `remember` is
    /// set; otherwise any previously cached identity is removed.
    pub fn save(
        &self,
        pair: &TokenPair,
        identity: Option<&UserIdentity>,
        remember: bool,
    ) -> StorageResult<()> {
        self.storage.set(StorageKeys::ACCESS_TOKEN, &pair.access_token)?;
        self.storage.set(StorageKeys::REFRESH_TOKEN, &pair.refresh_token)?;

        match identity.filter(|_| remember) {
            Some(identity) => {
                let json = serde_json::to_string(identity)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                self.storage.set(StorageKeys::USER, &json)?;
            }
            None => {
                self.storage.delete(StorageKeys::USER)?;
            }
        }

        tracing::debug!(remember, "Session persisted");
        Ok(())
    }

    /// Load the persisted token pair.
    ///
    /// Returns `None` when either token is missing or empty, or when the
    /// backend cannot be read.
    pub fn load(&self) -> Option<TokenPair> {
        let read = |key: &str| match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read session key");
                None
            }
        };

        let access_token = read(StorageKeys::ACCESS_TOKEN)?;
        let refresh_token = read(StorageKeys::REFRESH_TOKEN)?;
        Some(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Load the cached identity, if one was remembered and is still readable.
    pub fn load_identity(&self) -> Option<UserIdentity> {
        let json = match self.storage.get(StorageKeys::USER) {
            Ok(json) => json?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached user");
                return None;
            }
        };

        match serde_json::from_str(&json) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!(error = %e, "Cached user is corrupt, ignoring");
                None
            }
        }
    }

    /// Replace the access token after a refresh. The refresh token is only
    /// rewritten when the backend rotated it.
    pub fn update_access_token(
        &self,
        access_token: &str,
        rotated_refresh: Option<&str>,
    ) -> StorageResult<()> {
        self.storage.set(StorageKeys::ACCESS_TOKEN, access_token)?;
        if let Some(refresh_token) = rotated_refresh {
            self.storage.set(StorageKeys::REFRESH_TOKEN, refresh_token)?;
        }
        Ok(())
    }

    /// Remove every session key. Safe to call when nothing is stored.
    ///
    /// All keys are attempted even if one fails; the first failure is returned.
    pub fn clear(&self) -> StorageResult<()> {
        let mut first_error = None;
        for key in StorageKeys::ALL {
            if let Err(e) = self.storage.delete(key) {
                tracing::warn!(key, error = %e, "Failed to delete session key");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
