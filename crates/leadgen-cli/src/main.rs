//! Leadgen CLI - Command-line client for the lead-generation backend.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::Context;
use leadgen_config::{init_logging, Config, Paths};
use std::path::PathBuf;
use tracing::debug;

/// Leadgen CLI - Sign in and work with leads from the terminal.
#[derive(Parser)]
#[command(name = "leadgen")]
#[command(about = "Leadgen CLI for authentication and lead management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Backend API base URL
    #[arg(long, env = "LEADGEN_API_URL", global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with username and password
    Login {
        /// Keep the session across restarts
        #[arg(short, long)]
        remember: bool,
    },

    /// Create a new account
    Register {
        /// Username for the new account
        #[arg(short, long)]
        username: Option<String>,
        /// Email address for the new account
        #[arg(short, long)]
        email: Option<String>,
        /// Sign in right after the account is created
        #[arg(long)]
        login: bool,
    },

    /// Logout and clear session
    Logout,

    /// Check authentication status
    Status,

    /// Work with leads
    Leads {
        #[command(subcommand)]
        command: LeadCommands,
    },
}

#[derive(Subcommand)]
enum LeadCommands {
    /// List leads
    List,
    /// Show lead details
    Show {
        /// Lead ID
        id: String,
    },
    /// Import leads from a file
    Import {
        /// Path to the lead file
        file: PathBuf,
    },
    /// Score and process leads
    Process {
        /// Only process leads with this status
        #[arg(short, long)]
        status: Option<String>,
        /// Only process leads in this industry
        #[arg(short, long)]
        industry: Option<String>,
    },
    /// Generate outreach messages for a lead
    GenerateMessages {
        /// Lead ID
        id: String,
    },
    /// Send a test message for a lead
    TestMessage {
        /// Lead ID
        lead_id: String,
    },
}

async fn run(cli: Cli, config: Config, paths: &Paths) -> anyhow::Result<()> {
    let ctx = Context::connect(config, paths)?;
    let format = &cli.format;

    let result = match cli.command {
        Commands::Login { remember } => commands::login(&ctx, remember, format).await,
        Commands::Register {
            username,
            email,
            login,
        } => commands::register(&ctx, username, email, login, format).await,
        Commands::Logout => commands::logout(&ctx, format).await,
        Commands::Status => commands::status(&ctx, format).await,
        Commands::Leads { command } => match command {
            LeadCommands::List => commands::leads_list(&ctx, format).await,
            LeadCommands::Show { id } => commands::leads_show(&ctx, &id, format).await,
            LeadCommands::Import { file } => commands::leads_import(&ctx, &file, format).await,
            LeadCommands::Process { status, industry } => {
                commands::leads_process(&ctx, status.as_deref(), industry.as_deref(), format)
                    .await
            }
            LeadCommands::GenerateMessages { id } => {
                commands::leads_generate_messages(&ctx, &id, format).await
            }
            LeadCommands::TestMessage { lead_id } => {
                commands::leads_test_message(&ctx, &lead_id, format).await
            }
        },
    };

    ctx.session.shutdown();
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = Paths::new().and_then(|paths| {
        let mut config = Config::load(&paths)?;
        if let Some(url) = &cli.api_url {
            config.api_base_url = url.clone();
        }
        Ok((paths, config))
    });
    let (paths, config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            output::print_error(&e.to_string(), &cli.format);
            std::process::exit(1);
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level).to_string();
    init_logging("cli", &level, &paths, false);
    debug!(api_base_url = %config.api_base_url, "Configuration loaded");

    let format = cli.format;
    if let Err(e) = run(cli, config, &paths).await {
        output::print_error(&e.to_string(), &format);
        std::process::exit(1);
    }
}
