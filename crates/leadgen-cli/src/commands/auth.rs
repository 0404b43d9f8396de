//! Authentication commands.

use super::{describe, prompt, Context};
use crate::output::{self, OutputFormat};
use anyhow::Result;
use chrono::Utc;
use session_auth::{Credentials, RegistrationProfile, SessionState};
use serde_json::json;

/// Login with username (or email) and password.
pub async fn login(ctx: &Context, remember: bool, format: &OutputFormat) -> Result<()> {
    if let Some(user) = ctx.session.current_user() {
        output::print_success(
            &format!("Already logged in as {}", user.display_name()),
            format,
        );
        return Ok(());
    }

    let label = match ctx.config.identifier_field.as_str() {
        "email" => "Email",
        _ => "Username",
    };
    let identifier = required(label, prompt(label)?)?;

    // Read password without echo
    let password = required("Password", rpassword::prompt_password("Password: ")?)?;

    println!("Logging in...");
    let user = ctx
        .session
        .login(Credentials::new(identifier, password), remember)
        .await
        .map_err(describe)?;

    output::print_success(&format!("Logged in as {}", user.display_name()), format);
    Ok(())
}

fn required(label: &str, value: String) -> Result<String> {
    if value.is_empty() {
        anyhow::bail!("{} is required", label);
    }
    Ok(value)
}

/// Create an account, optionally signing in right away.
pub async fn register(
    ctx: &Context,
    username: Option<String>,
    email: Option<String>,
    and_login: bool,
    format: &OutputFormat,
) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt("Username")?,
    };
    let email = match email {
        Some(email) => email,
        None => prompt("Email")?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    let password_confirmation = rpassword::prompt_password("Confirm password: ")?;

    let profile = RegistrationProfile {
        username,
        email,
        password,
        password_confirmation,
    };

    if and_login {
        let user = ctx
            .session
            .register_and_login(&profile, true)
            .await
            .map_err(describe)?;
        output::print_success(
            &format!("Account created. Logged in as {}", user.display_name()),
            format,
        );
    } else {
        let user = ctx.session.register(&profile).await.map_err(describe)?;
        output::print_success(
            &format!(
                "Account {} created. Run 'leadgen login' to sign in",
                user.display_name()
            ),
            format,
        );
    }
    Ok(())
}

/// Logout and clear the persisted session.
pub async fn logout(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.session.logout();
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Show the current session.
pub async fn status(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let state = ctx.session.state();
    let claims = ctx.session.access_token_claims();
    let expires_at = claims.as_ref().and_then(|c| c.expires_at());
    let expired = claims
        .as_ref()
        .is_some_and(|c| c.is_expired_at(Utc::now()));

    match format {
        OutputFormat::Text => {
            println!("Server:   {}", ctx.config.api_base_url);
            match &state {
                SessionState::Authenticated(user) => {
                    println!("Auth:     logged in");
                    println!("User:     {}", user.display_name());
                    if let Some(id) = &user.id {
                        println!("User ID:  {}", id);
                    }
                    if let Some(role) = &user.role {
                        println!("Role:     {}", role);
                    }
                    match expires_at {
                        // An expired access token is refreshed on the next request
                        Some(at) if expired => println!("Expires:  {} (expired)", at),
                        Some(at) => println!("Expires:  {}", at),
                        None => println!("Expires:  unknown"),
                    }
                }
                _ => println!("Auth:     not logged in"),
            }
        }
        OutputFormat::Json => {
            let user = match &state {
                SessionState::Authenticated(user) => serde_json::to_value(user)?,
                _ => serde_json::Value::Null,
            };
            output::print_json(&json!({
                "server": ctx.config.api_base_url,
                "state": state.status(),
                "logged_in": matches!(state, SessionState::Authenticated(_)),
                "user": user,
                "expires_at": expires_at.map(|at| at.to_rfc3339()),
                "access_token_expired": expired,
            }));
        }
    }
    Ok(())
}
