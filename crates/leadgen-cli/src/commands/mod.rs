//! CLI command implementations.

mod auth;
mod leads;

pub use auth::{login, logout, register, status};
pub use leads::{
    leads_generate_messages, leads_import, leads_list, leads_process, leads_show,
    leads_test_message,
};

use anyhow::Result;
use leadgen_config::{Config, Paths};
use session_auth::{AuthError, AuthorizedClient, SessionManager};
use std::io::{self, Write};
use tracing::debug;

/// Everything a command needs: the session and a client that authorizes requests.
pub struct Context {
    pub config: Config,
    pub session: SessionManager,
    pub client: AuthorizedClient,
}

impl Context {
    /// Build the session stack and restore any persisted session.
    pub fn connect(config: Config, paths: &Paths) -> Result<Self> {
        let (session, transport) = SessionManager::from_config(&config, paths)?;
        let state = session.initialize()?;
        debug!(status = ?state.status(), "Session initialized");

        let client = AuthorizedClient::new(session.clone(), transport);
        Ok(Self {
            config,
            session,
            client,
        })
    }

    /// Fail early when a command needs a session.
    fn require_login(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            anyhow::bail!("Not logged in. Run 'leadgen login' first");
        }
        Ok(())
    }
}

/// Turn an auth error into something worth showing on the terminal.
fn describe(err: AuthError) -> anyhow::Error {
    debug!(error = %err, "Command failed");
    match err {
        AuthError::Unauthorized(message) => {
            anyhow::anyhow!("{} (run 'leadgen login' to sign in again)", message)
        }
        other => anyhow::anyhow!(other.user_message()),
    }
}

/// Prompt for a line of input.
fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
