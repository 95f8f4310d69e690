//! REST client for the SellPoint chat backend, plus the CLI commands built
//! on it

mod chat;
pub mod client;
mod commands;

use anyhow::Result;

use crate::config::Config;
use crate::models::ListingFilter;

/// List conversations, most recent first
pub async fn list_conversations(
    config: &Config,
    filter: ListingFilter,
    search: Option<&str>,
) -> Result<()> {
    commands::list_conversations(config, filter, search).await
}

/// Print a conversation's history and mark it read
pub async fn read_messages(config: &Config, conversation_id: &str, limit: usize) -> Result<()> {
    commands::read_messages(config, conversation_id, limit).await
}

/// Send a message over the realtime channel and wait for its ack
pub async fn send_message(config: &Config, conversation_id: &str, text: &str) -> Result<()> {
    commands::send_message(config, conversation_id, text).await
}

/// Edit one of your messages
pub async fn edit_message(
    config: &Config,
    conversation_id: &str,
    message_id: &str,
    text: &str,
) -> Result<()> {
    commands::edit_message(config, conversation_id, message_id, text).await
}

/// Delete one of your messages
pub async fn delete_message(config: &Config, conversation_id: &str, message_id: &str) -> Result<()> {
    commands::delete_message(config, conversation_id, message_id).await
}

/// Follow a conversation live
pub async fn watch(config: &Config, conversation_id: &str) -> Result<()> {
    commands::watch(config, conversation_id).await
}

/// Show the effective configuration
pub fn status(config: &Config) {
    commands::status(config)
}
