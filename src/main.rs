//! SellPoint Chat - buyer/seller messaging for SellPoint listings
//!
//! A terminal client for the SellPoint chat backend: REST for history and
//! conversations, Socket.IO for live messages.

mod api;
mod chat;
mod config;
mod error;
mod models;
mod realtime;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use models::ListingFilter;

#[derive(Parser)]
#[command(name = "sellpoint-chat")]
#[command(about = "Terminal client for SellPoint listing conversations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Act as this user id instead of the configured one
    #[arg(short, long, global = true)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store connection settings
    Configure {
        /// REST API base URL
        #[arg(long)]
        api_url: Option<String>,

        /// Socket.IO server URL
        #[arg(long)]
        socket_url: Option<String>,

        /// Your user id
        #[arg(long)]
        user_id: Option<String>,

        /// Bearer token for the REST API
        #[arg(long)]
        token: Option<String>,

        /// Number of messages fetched when opening a conversation
        #[arg(long)]
        history_limit: Option<usize>,

        /// Seconds to wait for a send acknowledgement
        #[arg(long)]
        ack_timeout: Option<u64>,
    },

    /// Show the effective configuration
    Status,

    /// List conversations, most recent first
    Conversations {
        /// Listing type to show
        #[arg(short = 't', long = "type", value_enum, default_value_t = ListingFilter::All)]
        listing_type: ListingFilter,

        /// Only conversations whose listing, participant or last message matches
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Read messages from a conversation
    Read {
        /// Conversation ID (from `conversations` output)
        conversation: String,

        /// Maximum number of messages to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Send a message
    Send {
        /// Conversation ID
        conversation: String,

        /// Message text
        text: String,
    },

    /// Edit one of your messages
    Edit {
        /// Conversation ID
        conversation: String,

        /// Message ID (shown by `read`)
        message: String,

        /// New text
        text: String,
    },

    /// Delete one of your messages
    Delete {
        /// Conversation ID
        conversation: String,

        /// Message ID (shown by `read`)
        message: String,
    },

    /// Print new messages of a conversation as they arrive
    Watch {
        /// Conversation ID
        conversation: String,
    },

    /// Launch the terminal user interface
    Tui,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(user) = cli.user {
        config.user_id = Some(user);
    }

    // Initialize logging. The TUI owns the terminal and logs to a file.
    if !matches!(cli.command, Commands::Tui) {
        let filter = if cli.verbose { "debug" } else { "info" };
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    match cli.command {
        Commands::Configure {
            api_url,
            socket_url,
            user_id,
            token,
            history_limit,
            ack_timeout,
        } => {
            // Start from the file, not the --user override.
            let mut stored = Config::load()?;
            if let Some(v) = api_url {
                stored.api_url = v;
            }
            if let Some(v) = socket_url {
                stored.socket_url = v;
            }
            if let Some(v) = user_id {
                stored.user_id = Some(v);
            }
            if let Some(v) = token {
                stored.access_token = Some(v).filter(|t| !t.is_empty());
            }
            if let Some(v) = history_limit {
                stored.history_limit = v;
            }
            if let Some(v) = ack_timeout {
                stored.ack_timeout_secs = v;
            }
            let path = stored.save().context("Failed to save configuration")?;
            println!("Configuration saved to {}", path.display());
        }
        Commands::Status => {
            api::status(&config);
        }
        Commands::Conversations {
            listing_type,
            search,
        } => {
            tracing::info!("Fetching conversations...");
            api::list_conversations(&config, listing_type, search.as_deref()).await?;
        }
        Commands::Read {
            conversation,
            limit,
        } => {
            let limit = limit.unwrap_or(config.history_limit);
            api::read_messages(&config, &conversation, limit).await?;
        }
        Commands::Send { conversation, text } => {
            tracing::info!("Sending message...");
            api::send_message(&config, &conversation, &text).await?;
        }
        Commands::Edit {
            conversation,
            message,
            text,
        } => {
            api::edit_message(&config, &conversation, &message, &text).await?;
        }
        Commands::Delete {
            conversation,
            message,
        } => {
            api::delete_message(&config, &conversation, &message).await?;
        }
        Commands::Watch { conversation } => {
            api::watch(&config, &conversation).await?;
        }
        Commands::Tui => {
            tui::run(config, cli.verbose).await?;
        }
    }

    Ok(())
}
