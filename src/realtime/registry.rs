//! Handler registry for `message:new` events.
//!
//! The socket task is conversation-agnostic: it hands every pushed message
//! to the registry, which forwards it to the subscriptions whose filter
//! matches. Subscriptions deregister themselves on drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::models::Message;

struct Handler {
    /// `None` receives every conversation.
    conversation_id: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    handlers: HashMap<u64, Handler>,
}

/// Shared set of live subscriptions.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<Inner>,
}

impl HandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to pushes for one conversation.
    pub fn register(self: &Arc<Self>, conversation_id: &str) -> Subscription {
        self.insert(Some(conversation_id.to_string()))
    }

    /// Subscribe to pushes for every conversation.
    pub fn register_all(self: &Arc<Self>) -> Subscription {
        self.insert(None)
    }

    fn insert(self: &Arc<Self>, conversation_id: Option<String>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = guard.next_id;
        guard.next_id += 1;
        guard.handlers.insert(
            id,
            Handler {
                conversation_id: conversation_id.clone(),
                tx,
            },
        );
        tracing::debug!("Registered handler {} for {:?}", id, conversation_id);

        Subscription {
            id,
            conversation_id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    /// Forward a pushed message to matching subscriptions.
    ///
    /// Returns how many subscriptions received it.
    pub fn dispatch(&self, message: &Message) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        for handler in guard.handlers.values() {
            let matches = handler
                .conversation_id
                .as_deref()
                .map_or(true, |c| c == message.conversation_id);
            if matches && handler.tx.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every handler. Open subscriptions observe end-of-stream.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let released = guard.handlers.len();
        guard.handlers.clear();
        if released > 0 {
            tracing::debug!("Released {} handlers", released);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.handlers.len()
    }

    fn remove(&self, id: u64) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.handlers.remove(&id);
    }
}

/// Receiving end of a registered handler.
///
/// Messages queue up until read, which lets a thread subscribe before its
/// history is loaded and replay the buffered pushes afterwards.
pub struct Subscription {
    id: u64,
    conversation_id: Option<String>,
    rx: mpsc::UnboundedReceiver<Message>,
    registry: Weak<HandlerRegistry>,
}

impl Subscription {
    /// Wait for the next message. `None` once the handler was released.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next already-buffered message, without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
            tracing::debug!("Released handler {} for {:?}", self.id, self.conversation_id);
        }
    }
}
