//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default backend API base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_IDENTIFIER_FIELD: &str = "username";

/// Backend endpoint paths, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Issue-tokens endpoint (`/token/`, or `/login/` on some deployments).
    pub login: String,
    /// Account registration endpoint.
    pub register: String,
    /// Access token refresh endpoint.
    pub refresh: String,
    /// Optional refresh-token revocation endpoint, called best-effort on logout.
    pub revoke: Option<String>,
    /// Lead collection endpoint.
    pub leads: String,
    /// Lead file import endpoint.
    pub import_leads: String,
    /// Lead processing (scoring) endpoint.
    pub process_leads: String,
    /// Outreach message test endpoint.
    pub test_message: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/token/".to_string(),
            register: "/register/".to_string(),
            refresh: "/token/refresh/".to_string(),
            revoke: None,
            leads: "/leads/".to_string(),
            import_leads: "/leads/import/".to_string(),
            process_leads: "/leads/process/".to_string(),
            test_message: "/leads/test-message/".to_string(),
        }
    }
}

impl Endpoints {
    /// Path of a single lead resource.
    pub fn lead(&self, lead_id: &str) -> String {
        format!("{}{}/", self.leads, lead_id)
    }

    /// Path of the message generation action for a lead.
    pub fn generate_messages(&self, lead_id: &str) -> String {
        format!("{}{}/generate-messages/", self.leads, lead_id)
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// JSON field the login endpoint expects the identifier in (`username` or `email`).
    #[serde(default = "default_identifier_field")]
    pub identifier_field: String,
    /// Per-request timeout in seconds. No timeout when absent.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Backend endpoint paths.
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Maximum attempts for a single access token refresh.
    #[serde(default = "default_refresh_max_retries")]
    pub refresh_max_retries: u32,
    /// Initial backoff between refresh attempts in milliseconds.
    #[serde(default = "default_refresh_initial_delay_ms")]
    pub refresh_initial_delay_ms: u64,
    /// Backoff cap between refresh attempts in milliseconds.
    #[serde(default = "default_refresh_max_delay_ms")]
    pub refresh_max_delay_ms: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_identifier_field() -> String {
    DEFAULT_IDENTIFIER_FIELD.to_string()
}

fn default_refresh_max_retries() -> u32 {
    3
}

fn default_refresh_initial_delay_ms() -> u64 {
    500
}

fn default_refresh_max_delay_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            identifier_field: default_identifier_field(),
            request_timeout_secs: None,
            endpoints: Endpoints::default(),
            refresh_max_retries: default_refresh_max_retries(),
            refresh_initial_delay_ms: default_refresh_initial_delay_ms(),
            refresh_max_delay_ms: default_refresh_max_delay_ms(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables override values from the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.api_base_url()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognized variables: `LEADGEN_API_URL`, `LEADGEN_LOG_LEVEL`,
    /// `LEADGEN_REQUEST_TIMEOUT_SECS`. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(url) = non_empty("LEADGEN_API_URL") {
            self.api_base_url = url;
        }
        if let Some(level) = non_empty("LEADGEN_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(timeout) = non_empty("LEADGEN_REQUEST_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.request_timeout_secs = Some(secs),
                Err(_) => tracing::warn!(value = %timeout, "Ignoring invalid request timeout"),
            }
        }
    }

    /// Get the API base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.api_base_url)?;
        if url.cannot_be_a_base() {
            return Err(CoreError::Config(format!(
                "API base URL cannot be used as a base: {}",
                self.api_base_url
            )));
        }
        Ok(url)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.identifier_field, "username");
        assert_eq!(config.endpoints.login, "/token/");
        assert_eq!(config.endpoints.refresh, "/token/refresh/");
        assert!(config.endpoints.revoke.is_none());
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "identifier_field": "email",
            "endpoints": { "login": "/login/" }
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.identifier_field, "email");
        assert_eq!(config.endpoints.login, "/login/");
        // Unspecified endpoints keep their defaults
        assert_eq!(config.endpoints.register, "/register/");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.api_base_url = "https://api.example.com/api".to_string();
        config.refresh_max_retries = 1;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.api_base_url, "https://api.example.com/api");
        assert_eq!(loaded.refresh_max_retries, 1);
    }

    #[test]
    fn test_overrides_apply_and_ignore_blank() {
        let vars: HashMap<&str, &str> = [
            ("LEADGEN_API_URL", "https://staging.example.com/api"),
            ("LEADGEN_LOG_LEVEL", "   "),
            ("LEADGEN_REQUEST_TIMEOUT_SECS", "15"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "https://staging.example.com/api");
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_invalid_timeout_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|name| {
            (name == "LEADGEN_REQUEST_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(config.request_timeout_secs.is_none());
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.api_base_url = "not a valid url".to_string();
        assert!(config.api_base_url().is_err());

        config.api_base_url = "mailto:someone@example.com".to_string();
        assert!(matches!(config.api_base_url(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_lead_paths() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.lead("42"), "/leads/42/");
        assert_eq!(endpoints.generate_messages("42"), "/leads/42/generate-messages/");
    }
}
