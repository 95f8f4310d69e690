//! State of one open conversation thread.
//!
//! Everything here is synchronous: the controller (or the TUI event loop)
//! performs the I/O and feeds results in as discrete events.

use crate::error::ChatError;
use crate::models::{Conversation, Message, Participant};

use super::store::MessageStore;

/// What happened to a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored as a new message.
    Appended,
    /// Already stored (history overlap or repeated delivery).
    Duplicate,
    /// Broadcast of our own message; the ack path owns those.
    OwnEcho,
    /// Belongs to another conversation.
    OtherConversation,
}

/// Messages and metadata of the thread currently on screen.
#[derive(Debug)]
pub struct ChatThread {
    conversation_id: String,
    current_user_id: String,
    conversation: Option<Conversation>,
    store: MessageStore,
    seeded: bool,
}

impl ChatThread {
    pub fn new(conversation_id: &str, current_user_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            current_user_id: current_user_id.to_string(),
            conversation: None,
            store: MessageStore::new(),
            seeded: false,
        }
    }

    /// Install the initial metadata and history.
    ///
    /// Until this runs, pushes must be held back by the caller.
    pub fn seed(&mut self, conversation: Option<Conversation>, history: Vec<Message>) {
        self.conversation = conversation;
        self.store.load_history(history);
        self.seeded = true;
        tracing::debug!(
            "Thread {} seeded with {} messages",
            self.conversation_id,
            self.store.len()
        );
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    /// The participant on the other side, if metadata loaded.
    pub fn other_participant(&self) -> Option<&Participant> {
        self.conversation
            .as_ref()?
            .other_participant(&self.current_user_id)
    }

    /// Header text: listing title, falling back to the other participant.
    pub fn title(&self) -> String {
        let listing = self.conversation.as_ref().and_then(|c| c.listing_title());
        let other = self.other_participant().map(|p| p.display_name());
        match (listing, other) {
            (Some(l), Some(o)) => format!("{} - {}", l, o),
            (Some(l), None) => l.to_string(),
            (None, Some(o)) => o.to_string(),
            (None, None) => self.conversation_id.clone(),
        }
    }

    /// Apply a `message:new` push.
    ///
    /// Our own messages are dropped here even when they carry a fresh id:
    /// they enter the store through [`ChatThread::accept_ack`] only.
    pub fn accept_push(&mut self, message: Message) -> PushOutcome {
        if message.conversation_id != self.conversation_id {
            return PushOutcome::OtherConversation;
        }
        if message.is_from(&self.current_user_id) {
            tracing::debug!("Ignoring echo of own message {:?}", message.id);
            return PushOutcome::OwnEcho;
        }
        if self.store.append(message) {
            PushOutcome::Appended
        } else {
            PushOutcome::Duplicate
        }
    }

    /// Apply the persisted message returned by a send acknowledgement.
    pub fn accept_ack(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id {
            tracing::warn!(
                "Ack for conversation {} arrived in thread {}",
                message.conversation_id,
                self.conversation_id
            );
            return false;
        }
        self.store.append(message)
    }

    /// Check that message `id` is here and authored by the current user.
    pub fn ensure_sender(&self, id: &str) -> Result<&Message, ChatError> {
        let message = self
            .store
            .get(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if !message.is_from(&self.current_user_id) {
            return Err(ChatError::NotSender(id.to_string()));
        }
        Ok(message)
    }

    /// Reflect a successful edit.
    pub fn apply_edit(&mut self, id: &str, text: &str) -> bool {
        self.store.replace_text(id, text)
    }

    /// Reflect a successful delete.
    pub fn apply_delete(&mut self, id: &str) -> bool {
        self.store.remove(id).is_some()
    }
}

/// Text to send for a draft: trimmed, or `None` when blank.
pub fn outgoing_text(draft: &str) -> Option<String> {
    let text = draft.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
