//! One-shot CLI commands against the chat backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};

use super::client::ApiClient;
use crate::chat::{ChatThread, ConversationDirectory, PushOutcome, ThreadController};
use crate::config::Config;
use crate::models::{ListingFilter, Message};
use crate::realtime::RealtimeChannel;

type Controller = ThreadController<ApiClient, RealtimeChannel>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PREVIEW_CHARS: usize = 80;

pub async fn list_conversations(
    config: &Config,
    filter: ListingFilter,
    search: Option<&str>,
) -> Result<()> {
    let user = config.require_user()?;
    let client = ApiClient::new(config)?;
    let mut directory = ConversationDirectory::new();
    directory.load(&client, filter).await?;

    let view = directory.view(search.unwrap_or(""), user);

    println!("\nConversations ({}):", filter);
    println!("{:-<60}", "");

    if directory.is_empty() {
        println!("  (no conversations found)");
        return Ok(());
    }
    if view.is_empty() {
        println!("  (no conversations match {:?})", search.unwrap_or(""));
        return Ok(());
    }

    for conv in view {
        let title = conv.listing_title().unwrap_or("(untitled listing)");
        match conv.unread_for(user) {
            0 => println!("{}", title),
            n => println!("{} [{} unread]", title, n),
        }
        println!("  ID: {}", conv.id);

        if let Some(other) = conv.other_participant(user) {
            println!("  With: {}", other.display_name());
        }
        if let Some(at) = conv.activity_at() {
            println!("  Last: {}", format_time(at));
        }
        if let Some(ref last) = conv.last_message {
            if !last.trim().is_empty() {
                println!("  > {}", preview(last));
            }
        }

        println!();
    }

    Ok(())
}

pub async fn read_messages(config: &Config, conversation_id: &str, limit: usize) -> Result<()> {
    // History and read receipt only; no live connection needed.
    let channel = Arc::new(offline_channel(config));
    let controller = open_thread(config, channel, conversation_id, limit).await?;

    print_thread(controller.thread());
    if !controller.read_receipt_sent() {
        println!("(could not mark the conversation as read)");
    }
    Ok(())
}

pub async fn send_message(config: &Config, conversation_id: &str, text: &str) -> Result<()> {
    let channel = connected_channel(config).await?;
    let mut controller =
        open_thread(config, channel.clone(), conversation_id, config.history_limit).await?;

    let mut draft = text.to_string();
    let result = controller.send(&mut draft).await;
    controller.close();
    channel.disconnect().await;

    match result? {
        Some(message) => println!("Message sent ({}).", message.id().unwrap_or("no id")),
        None => bail!("Nothing to send: the message is blank"),
    }
    Ok(())
}

pub async fn edit_message(
    config: &Config,
    conversation_id: &str,
    message_id: &str,
    text: &str,
) -> Result<()> {
    let channel = Arc::new(offline_channel(config));
    let mut controller =
        open_thread(config, channel, conversation_id, config.history_limit).await?;

    controller
        .edit(message_id, text)
        .await
        .with_context(|| format!("Could not edit message {}", message_id))?;
    println!("Message edited.");
    Ok(())
}

pub async fn delete_message(config: &Config, conversation_id: &str, message_id: &str) -> Result<()> {
    let channel = Arc::new(offline_channel(config));
    let mut controller =
        open_thread(config, channel, conversation_id, config.history_limit).await?;

    controller
        .delete(message_id)
        .await
        .with_context(|| format!("Could not delete message {}", message_id))?;
    println!("Message deleted.");
    Ok(())
}

/// Print the thread, then every new message until Ctrl+C.
pub async fn watch(config: &Config, conversation_id: &str) -> Result<()> {
    let channel = connected_channel(config).await?;
    let mut controller =
        open_thread(config, channel.clone(), conversation_id, config.history_limit).await?;
    let mut state = channel
        .watch_state()
        .context("Realtime connection ended before watching started")?;

    print_thread(controller.thread());
    println!("-- watching, Ctrl+C to stop --");

    loop {
        tokio::select! {
            outcome = controller.next_push() => match outcome {
                Some(PushOutcome::Appended) => {
                    let thread = controller.thread();
                    if let Some(message) = thread.messages().last() {
                        print_message(thread, message);
                    }
                }
                Some(_) => {}
                None => {
                    tracing::warn!("Realtime channel released the subscription");
                    break;
                }
            },
            changed = state.changed() => {
                if changed.is_err() {
                    tracing::warn!("Realtime connection task ended");
                    break;
                }
                let current = *state.borrow_and_update();
                eprintln!("-- {} --", current.as_str());
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    controller.close();
    channel.disconnect().await;
    Ok(())
}

pub fn status(config: &Config) {
    println!("API URL:        {}", config.api_url);
    println!("Socket URL:     {}", config.socket_url);
    match config.require_user() {
        Ok(user) => println!("User:           {}", user),
        Err(_) => println!("User:           (not set, run 'sellpoint-chat configure --user-id <ID>')"),
    }
    println!(
        "Access token:   {}",
        if config.access_token.is_some() { "set" } else { "not set" }
    );
    println!("History limit:  {}", config.history_limit);
    println!("Ack timeout:    {}s", config.ack_timeout().as_secs());
}

fn offline_channel(config: &Config) -> RealtimeChannel {
    RealtimeChannel::new(&config.socket_url, config.ack_timeout())
}

async fn connected_channel(config: &Config) -> Result<Arc<RealtimeChannel>> {
    let user = config.require_user()?;
    let channel = Arc::new(offline_channel(config));
    channel.connect(user);

    if !channel.wait_connected(CONNECT_TIMEOUT).await {
        channel.disconnect().await;
        bail!(
            "Could not connect to {} within {}s",
            config.socket_url,
            CONNECT_TIMEOUT.as_secs()
        );
    }
    Ok(channel)
}

async fn open_thread(
    config: &Config,
    channel: Arc<RealtimeChannel>,
    conversation_id: &str,
    limit: usize,
) -> Result<Controller> {
    let user = config.require_user()?;
    let client = Arc::new(ApiClient::new(config)?);
    Ok(ThreadController::open(client, channel, conversation_id, user, limit).await)
}

fn print_thread(thread: &ChatThread) {
    println!("\n{}", thread.title());
    println!("{:-<60}", "");

    if thread.messages().is_empty() {
        println!("(no messages)");
        return;
    }
    for message in thread.messages() {
        print_message(thread, message);
    }
}

fn print_message(thread: &ChatThread, message: &Message) {
    let time = format_time(message.created_at);
    let sender = sender_label(thread, message);
    match message.id() {
        Some(id) => println!("[{}] {}: {}  ({})", time, sender, message.text, id),
        None => println!("[{}] {}: {}", time, sender, message.text),
    }
}

fn sender_label<'a>(thread: &'a ChatThread, message: &'a Message) -> &'a str {
    if message.is_from(thread.current_user_id()) {
        return "you";
    }
    thread
        .conversation()
        .and_then(|c| c.participants.iter().find(|p| p.id == message.from))
        .map(|p| p.display_name())
        .unwrap_or(&message.from)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn preview(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, Participant};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn message(from: &str, text: &str) -> Message {
        Message {
            id: Some("m1".to_string()),
            conversation_id: "c1".to_string(),
            from: from.to_string(),
            to: "x".to_string(),
            text: text.to_string(),
            created_at: Utc.timestamp_opt(1_714_557_600, 0).unwrap(),
        }
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("  short  "), "short");
        let long = "é".repeat(100);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_sender_label() {
        let mut thread = ChatThread::new("c1", "u1");
        let stranger = message("u3", "hey");
        assert_eq!(sender_label(&thread, &stranger), "u3");

        thread.seed(
            Some(Conversation {
                id: "c1".to_string(),
                participants: vec![
                    Participant {
                        id: "u1".to_string(),
                        name: Some("Ana".to_string()),
                        email: None,
                    },
                    Participant {
                        id: "u2".to_string(),
                        name: None,
                        email: Some("ben@example.com".to_string()),
                    },
                ],
                listing: None,
                last_message: None,
                last_message_at: None,
                updated_at: None,
                unread: HashMap::new(),
            }),
            Vec::new(),
        );
        assert_eq!(sender_label(&thread, &message("u1", "mine")), "you");
        assert_eq!(sender_label(&thread, &message("u2", "hi")), "ben@example.com");
    }
}
