//! # parley
//!
//! Terminal client for Parley realtime chat.
//!
//! ## Commands
//!
//! - `login`: Verify and store an auth token
//! - `logout`: Forget the stored token
//! - `status`: Show the session and unread counters
//! - `listen`: Follow the live session, optionally chatting in one conversation
//! - `send`: Send one message and wait for delivery
//! - `random`: Talk to a random partner
//!
//! ## Example
//!
//! ```bash
//! # Store the token issued by the web login
//! parley login --token eyJhbGciOi... --server-url wss://chat.example.com/ws
//!
//! # Chat in a conversation (by id or display name)
//! parley listen --conversation Bob
//!
//! # One-shot send
//! parley send Bob "on my way"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{listen, login, logout, random, send, status};
use config::{set_dir_permissions_0700, CliConfig, CONFIG_FILE};

/// Terminal client for Parley realtime chat.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the stored token and configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (defaults to parley.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify and store an auth token
    Login {
        /// Token issued by the server at login
        #[arg(long, short)]
        token: String,

        /// WebSocket endpoint to remember in the config file
        #[arg(long)]
        server_url: Option<String>,

        /// REST base URL to remember in the config file
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Forget the stored token
    Logout,

    /// Show the session and unread counters
    Status,

    /// Follow the live session; lines typed on stdin are sent
    Listen {
        /// Conversation to open (id or display name)
        #[arg(long, short)]
        conversation: Option<String>,
    },

    /// Send one message and wait for the server to acknowledge it
    Send {
        /// Conversation (id or display name)
        conversation: String,

        /// Message text
        message: String,
    },

    /// Talk to a random partner
    Random,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    set_dir_permissions_0700(&data_dir).await?;

    let config_path = cli.config.unwrap_or_else(|| data_dir.join(CONFIG_FILE));
    let mut config = CliConfig::load(&config_path).await?;

    match cli.command {
        Commands::Login {
            token,
            server_url,
            api_url,
        } => {
            if server_url.is_some() || api_url.is_some() {
                config.server_url = server_url.unwrap_or(config.server_url);
                config.api_url = api_url.unwrap_or(config.api_url);
                config.save(&config_path).await?;
            }
            login::run(&data_dir, &config, &token).await?;
        }
        Commands::Logout => {
            logout::run(&data_dir).await?;
        }
        Commands::Status => {
            status::run(&data_dir, &config).await?;
        }
        Commands::Listen { conversation } => {
            listen::run(&data_dir, &config, conversation.as_deref()).await?;
        }
        Commands::Send {
            conversation,
            message,
        } => {
            send::run(&data_dir, &config, &conversation, &message).await?;
        }
        Commands::Random => {
            random::run(&data_dir, &config).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for parley.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("chat", "parley", "parley")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
