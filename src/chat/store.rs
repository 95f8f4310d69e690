//! Message store for one open conversation thread.
//!
//! Messages reach a thread over two paths: the REST history fetch and the
//! realtime channel (pushes from the other participant, acks for our own
//! sends). The store owns the dedup index that collapses those arrivals to
//! a single stored message.

use std::collections::HashSet;
use std::fmt;

use chrono::SecondsFormat;

use crate::models::Message;

/// Identity used to collapse duplicate arrivals of the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Backend-assigned message id.
    Id(String),
    /// `from|to|text|createdAt` for messages without an id.
    Signature(String),
}

impl DedupKey {
    pub fn of(message: &Message) -> Self {
        match message.id() {
            Some(id) if !id.is_empty() => DedupKey::Id(id.to_string()),
            _ => DedupKey::Signature(format!(
                "{}|{}|{}|{}",
                message.from,
                message.to,
                message.text,
                message
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            )),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Id(id) => write!(f, "id:{}", id),
            DedupKey::Signature(sig) => write!(f, "sig:{}", sig),
        }
    }
}

/// Ordered messages of one thread plus the keys already seen.
///
/// The index only grows while the thread is open: removing a message keeps
/// its key, so a late echo of a deleted message is still rejected.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    seen: HashSet<DedupKey>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole sequence with a freshly fetched history.
    pub fn load_history(&mut self, history: Vec<Message>) {
        self.messages.clear();
        self.seen.clear();
        for message in history {
            self.append(message);
        }
    }

    /// Append unless the message's key was already recorded.
    ///
    /// Returns whether the message was inserted.
    pub fn append(&mut self, message: Message) -> bool {
        let key = DedupKey::of(&message);
        if self.contains(&key) {
            tracing::debug!("Dropping duplicate message {}", key);
            return false;
        }
        self.seen.insert(key);
        self.messages.push(message);
        true
    }

    /// Replace the text of message `id` in place. No-op if it is not here.
    pub fn replace_text(&mut self, id: &str, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id() == Some(id)) {
            Some(message) => {
                message.text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove message `id`. No-op if it is not here.
    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let pos = self.messages.iter().position(|m| m.id() == Some(id))?;
        Some(self.messages.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == Some(id))
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}
