//! Storage key constants.

/// Keys under which the session is persisted.
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer access token
    pub const ACCESS_TOKEN: &'static str = "accessToken";

    /// Refresh token
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    /// Cached user identity (JSON), only written for remembered sessions
    pub const USER: &'static str = "user";

    /// Every key owned by the session.
    pub const ALL: [&'static str; 3] = [Self::ACCESS_TOKEN, Self::REFRESH_TOKEN, Self::USER];
}
