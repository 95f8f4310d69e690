//! Chat reconciliation core
//!
//! Holds the per-thread message store, the conversation directory and the
//! controller that merges REST history with realtime pushes. I/O is reached
//! through the two traits below so the core can be driven by the real
//! REST client and Socket.IO channel, or by fakes in tests.

pub mod controller;
pub mod directory;
pub mod store;
pub mod thread;

use anyhow::Result;

use crate::error::ChatError;
use crate::models::{Conversation, ListingFilter, Message};
use crate::realtime::Subscription;

pub use controller::{fetch_thread, send_read_receipt, ThreadController};
pub use directory::ConversationDirectory;
pub use thread::{ChatThread, PushOutcome};

/// REST collaborator consumed by the chat core.
pub trait ChatApi {
    async fn list_conversations(&self, filter: ListingFilter) -> Result<Vec<Conversation>>;
    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation>;
    /// History of a conversation, oldest first.
    async fn fetch_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>>;
    async fn mark_read(&self, conversation_id: &str) -> Result<()>;
    async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message>;
    async fn delete_message(&self, message_id: &str) -> Result<()>;
}

/// Realtime collaborator consumed by the chat core.
pub trait MessageChannel {
    fn is_connected(&self) -> bool;
    /// Register a handler for `message:new` events of one conversation.
    fn on_message(&self, conversation_id: &str) -> Subscription;
    /// Emit `message:send` and wait for the acknowledgement.
    async fn send(&self, conversation_id: &str, text: &str) -> Result<Message, ChatError>;
}
