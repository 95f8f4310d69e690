//! Reconciliation controller: opens a thread and keeps it consistent.
//!
//! Opening a thread subscribes to the realtime channel *before* fetching
//! history. Pushes that race the fetch wait in the subscription and are
//! applied only after the store and its dedup index are seeded, so a
//! message present in both the history and the push stream is stored once.

use std::sync::Arc;

use super::thread::{outgoing_text, ChatThread, PushOutcome};
use super::{ChatApi, MessageChannel};
use crate::error::ChatError;
use crate::models::{Conversation, Message};
use crate::realtime::Subscription;

/// Drives one open conversation thread against the REST API and the
/// realtime channel.
pub struct ThreadController<A, C> {
    api: Arc<A>,
    channel: Arc<C>,
    thread: ChatThread,
    subscription: Option<Subscription>,
    read_receipt_sent: bool,
}

impl<A: ChatApi, C: MessageChannel> ThreadController<A, C> {
    /// Open `conversation_id` for `current_user_id`.
    ///
    /// See [`fetch_thread`] for how load failures degrade. Dropping the
    /// returned future before it resolves discards everything fetched so far.
    pub async fn open(
        api: Arc<A>,
        channel: Arc<C>,
        conversation_id: &str,
        current_user_id: &str,
        history_limit: usize,
    ) -> Self {
        let subscription = channel.on_message(conversation_id);

        let (metadata, history) = fetch_thread(api.as_ref(), conversation_id, history_limit).await;
        let mut thread = ChatThread::new(conversation_id, current_user_id);
        thread.seed(metadata, history);

        let read_receipt_sent = send_read_receipt(api.as_ref(), conversation_id).await;

        let mut controller = Self {
            api,
            channel,
            thread,
            subscription: Some(subscription),
            read_receipt_sent,
        };
        let replayed = controller.drain_pushes();
        if replayed > 0 {
            tracing::debug!("Replayed {} pushes buffered during open", replayed);
        }
        controller
    }

    pub fn thread(&self) -> &ChatThread {
        &self.thread
    }

    pub fn read_receipt_sent(&self) -> bool {
        self.read_receipt_sent
    }

    /// Wait for the next push and apply it.
    ///
    /// Returns `None` when the thread was closed or the channel released
    /// its handlers.
    pub async fn next_push(&mut self) -> Option<PushOutcome> {
        let message = self.subscription.as_mut()?.recv().await?;
        Some(self.thread.accept_push(message))
    }

    /// Apply every push already buffered, without waiting.
    ///
    /// Returns how many were appended.
    pub fn drain_pushes(&mut self) -> usize {
        let Some(subscription) = self.subscription.as_mut() else {
            return 0;
        };
        let mut appended = 0;
        while let Some(message) = subscription.try_recv() {
            if self.thread.accept_push(message) == PushOutcome::Appended {
                appended += 1;
            }
        }
        appended
    }

    /// Send the draft through the realtime channel.
    ///
    /// A blank draft is a no-op (`Ok(None)`). On acknowledgement the
    /// persisted message is stored and the draft cleared; on any failure
    /// the draft is left untouched for a retry.
    pub async fn send(&mut self, draft: &mut String) -> Result<Option<Message>, ChatError> {
        let Some(text) = outgoing_text(draft) else {
            return Ok(None);
        };
        if !self.channel.is_connected() {
            return Err(ChatError::NotConnected);
        }

        let message = self
            .channel
            .send(self.thread.conversation_id(), &text)
            .await
            .inspect_err(|e| tracing::warn!("Send failed: {}", e))?;

        self.thread.accept_ack(message.clone());
        draft.clear();
        Ok(Some(message))
    }

    /// Edit one of the current user's messages.
    ///
    /// The store only changes once the backend confirmed the edit.
    pub async fn edit(&mut self, message_id: &str, text: &str) -> Result<(), ChatError> {
        let text = outgoing_text(text).ok_or(ChatError::EmptyText)?;
        self.thread.ensure_sender(message_id)?;

        let updated = self
            .api
            .edit_message(message_id, &text)
            .await
            .inspect_err(|e| tracing::warn!("Edit of {} failed: {:#}", message_id, e))?;

        let text = if updated.text.is_empty() {
            text
        } else {
            updated.text
        };
        self.thread.apply_edit(message_id, &text);
        Ok(())
    }

    /// Delete one of the current user's messages.
    pub async fn delete(&mut self, message_id: &str) -> Result<(), ChatError> {
        self.thread.ensure_sender(message_id)?;

        self.api
            .delete_message(message_id)
            .await
            .inspect_err(|e| tracing::warn!("Delete of {} failed: {:#}", message_id, e))?;

        self.thread.apply_delete(message_id);
        Ok(())
    }

    /// Stop listening for pushes. The channel connection itself stays up.
    pub fn close(&mut self) {
        if self.subscription.take().is_some() {
            tracing::debug!("Closed thread {}", self.thread.conversation_id());
        }
    }
}

/// Load metadata and history of a thread concurrently.
///
/// Either may fail without failing the whole load: the thread then shows
/// without a header or with an empty history.
pub async fn fetch_thread<A: ChatApi>(
    api: &A,
    conversation_id: &str,
    history_limit: usize,
) -> (Option<Conversation>, Vec<Message>) {
    let (metadata, history) = tokio::join!(
        api.get_conversation(conversation_id),
        api.fetch_messages(conversation_id, history_limit),
    );
    let metadata = match metadata {
        Ok(conv) => Some(conv),
        Err(e) => {
            tracing::warn!("Failed to load conversation {}: {:#}", conversation_id, e);
            None
        }
    };
    let history = history.unwrap_or_else(|e| {
        tracing::warn!("Failed to load history of {}: {:#}", conversation_id, e);
        Vec::new()
    });
    (metadata, history)
}

/// Mark a thread read. Read state is best-effort; returns whether the
/// receipt went through.
pub async fn send_read_receipt<A: ChatApi>(api: &A, conversation_id: &str) -> bool {
    match api.mark_read(conversation_id).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Read receipt for {} failed: {:#}", conversation_id, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, ListingFilter, Participant};
    use crate::realtime::HandlerRegistry;
    use anyhow::{anyhow, Result};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap()
    }

    fn msg(id: &str, from: &str, text: &str, secs: i64) -> Message {
        Message {
            id: Some(id.to_string()),
            conversation_id: "c1".to_string(),
            from: from.to_string(),
            to: if from == "u1" { "u2" } else { "u1" }.to_string(),
            text: text.to_string(),
            created_at: at(secs),
        }
    }

    fn metadata() -> Conversation {
        Conversation {
            id: "c1".to_string(),
            participants: vec![
                Participant {
                    id: "u1".to_string(),
                    name: Some("Buyer".to_string()),
                    email: None,
                },
                Participant {
                    id: "u2".to_string(),
                    name: Some("Seller".to_string()),
                    email: None,
                },
            ],
            listing: None,
            last_message: None,
            last_message_at: None,
            updated_at: None,
            unread: HashMap::new(),
        }
    }

    #[derive(Default)]
    struct FakeApi {
        history: Vec<Message>,
        fail_metadata: bool,
        fail_history: bool,
        fail_read: bool,
        fail_mutations: bool,
        /// Pushed into the registry while history is "in flight".
        push_during_fetch: Option<(Arc<HandlerRegistry>, Message)>,
        read_calls: AtomicUsize,
        edit_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    impl ChatApi for FakeApi {
        async fn list_conversations(&self, _filter: ListingFilter) -> Result<Vec<Conversation>> {
            Ok(vec![metadata()])
        }

        async fn get_conversation(&self, _conversation_id: &str) -> Result<Conversation> {
            if self.fail_metadata {
                return Err(anyhow!("HTTP 500"));
            }
            Ok(metadata())
        }

        async fn fetch_messages(&self, _conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
            if let Some((registry, push)) = &self.push_during_fetch {
                registry.dispatch(push);
            }
            if self.fail_history {
                return Err(anyhow!("connection reset"));
            }
            Ok(self.history.iter().take(limit).cloned().collect())
        }

        async fn mark_read(&self, _conversation_id: &str) -> Result<()> {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_read {
                return Err(anyhow!("HTTP 503"));
            }
            Ok(())
        }

        async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message> {
            self.edit_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_mutations {
                return Err(anyhow!("HTTP 403"));
            }
            Ok(msg(message_id, "u1", text, 0))
        }

        async fn delete_message(&self, _message_id: &str) -> Result<()> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_mutations {
                return Err(anyhow!("HTTP 403"));
            }
            Ok(())
        }
    }

    struct FakeChannel {
        registry: Arc<HandlerRegistry>,
        connected: AtomicBool,
        acks: Mutex<VecDeque<Result<Message, ChatError>>>,
        /// Broadcast each acknowledged message back before the ack resolves.
        echo_acks: bool,
        sends: AtomicUsize,
    }

    impl FakeChannel {
        fn new() -> Self {
            Self {
                registry: HandlerRegistry::new(),
                connected: AtomicBool::new(true),
                acks: Mutex::new(VecDeque::new()),
                echo_acks: false,
                sends: AtomicUsize::new(0),
            }
        }

        fn ack_with(self, ack: Result<Message, ChatError>) -> Self {
            self.acks.lock().unwrap().push_back(ack);
            self
        }
    }

    impl MessageChannel for FakeChannel {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn on_message(&self, conversation_id: &str) -> Subscription {
            self.registry.register(conversation_id)
        }

        async fn send(&self, _conversation_id: &str, _text: &str) -> Result<Message, ChatError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let ack = self
                .acks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ChatError::ChannelClosed));
            if let (true, Ok(message)) = (self.echo_acks, &ack) {
                self.registry.dispatch(message);
            }
            ack
        }
    }

    async fn open(api: FakeApi, channel: FakeChannel) -> ThreadController<FakeApi, FakeChannel> {
        ThreadController::open(Arc::new(api), Arc::new(channel), "c1", "u1", 50).await
    }

    #[tokio::test]
    async fn test_open_empty_thread_then_push() {
        let channel = FakeChannel::new();
        let registry = Arc::clone(&channel.registry);
        let mut ctl = open(FakeApi::default(), channel).await;

        assert!(ctl.thread().is_seeded());
        assert!(ctl.thread().messages().is_empty());
        assert!(ctl.read_receipt_sent());
        assert_eq!(ctl.api.read_calls.load(Ordering::SeqCst), 1);

        registry.dispatch(&msg("m7", "u2", "Still available?", 5));
        assert_eq!(ctl.next_push().await, Some(PushOutcome::Appended));
        assert_eq!(ctl.thread().messages().len(), 1);
        assert_eq!(ctl.api.read_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_racing_history_is_stored_once() {
        let channel = FakeChannel::new();
        let overlap = msg("m2", "u2", "b", 2);
        let api = FakeApi {
            history: vec![msg("m1", "u2", "a", 1), overlap.clone()],
            push_during_fetch: Some((Arc::clone(&channel.registry), overlap)),
            ..FakeApi::default()
        };
        let ctl = open(api, channel).await;

        let ids: Vec<_> = ctl.thread().messages().iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![Some("m1"), Some("m2")]);
    }

    #[tokio::test]
    async fn test_open_degrades_on_fetch_failures() {
        let api = FakeApi {
            history: vec![msg("m1", "u2", "a", 1)],
            fail_metadata: true,
            fail_history: true,
            fail_read: true,
            ..FakeApi::default()
        };
        let ctl = open(api, FakeChannel::new()).await;

        assert!(ctl.thread().is_seeded());
        assert!(ctl.thread().conversation().is_none());
        assert!(ctl.thread().messages().is_empty());
        assert!(!ctl.read_receipt_sent());
    }

    #[tokio::test]
    async fn test_send_stores_ack_and_clears_draft() {
        let ack = msg("m1", "u1", "hello", 3);
        let channel = FakeChannel::new().ack_with(Ok(ack));
        let mut ctl = open(FakeApi::default(), channel).await;

        let mut draft = "  hello ".to_string();
        let sent = ctl.send(&mut draft).await.unwrap().unwrap();
        assert_eq!(sent.id(), Some("m1"));
        assert!(draft.is_empty());
        assert_eq!(ctl.thread().messages().len(), 1);
        assert_eq!(ctl.thread().messages()[0].id(), Some("m1"));
    }

    #[tokio::test]
    async fn test_own_broadcast_is_filtered() {
        let ack = msg("m1", "u1", "hello", 3);
        let mut channel = FakeChannel::new().ack_with(Ok(ack));
        channel.echo_acks = true;
        let mut ctl = open(FakeApi::default(), channel).await;

        let mut draft = "hello".to_string();
        ctl.send(&mut draft).await.unwrap();
        assert_eq!(ctl.drain_pushes(), 0);
        assert_eq!(ctl.thread().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_draft() {
        let channel = FakeChannel::new().ack_with(Err(ChatError::SendRejected));
        let mut ctl = open(FakeApi::default(), channel).await;

        let mut draft = "hello".to_string();
        let err = ctl.send(&mut draft).await.unwrap_err();
        assert!(matches!(err, ChatError::SendRejected));
        assert_eq!(draft, "hello");
        assert!(ctl.thread().messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_blank_or_disconnected_is_noop() {
        let channel = FakeChannel::new();
        channel.connected.store(false, Ordering::SeqCst);
        let mut ctl = open(FakeApi::default(), channel).await;

        let mut blank = "   ".to_string();
        assert!(ctl.send(&mut blank).await.unwrap().is_none());

        let mut draft = "hello".to_string();
        let err = ctl.send(&mut draft).await.unwrap_err();
        assert!(matches!(err, ChatError::NotConnected));
        assert_eq!(draft, "hello");
        assert_eq!(ctl.channel.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_edit_replaces_text_in_place() {
        let api = FakeApi {
            history: vec![msg("m0", "u2", "hi", 0), msg("m1", "u1", "hello", 1)],
            ..FakeApi::default()
        };
        let mut ctl = open(api, FakeChannel::new()).await;

        ctl.edit("m1", "hello there").await.unwrap();
        let edited = &ctl.thread().messages()[1];
        assert_eq!(edited.id(), Some("m1"));
        assert_eq!(edited.text, "hello there");
        assert_eq!(edited.created_at, at(1));
    }

    #[tokio::test]
    async fn test_edit_and_delete_failures_leave_store_unchanged() {
        let api = FakeApi {
            history: vec![msg("m1", "u1", "hello", 1)],
            fail_mutations: true,
            ..FakeApi::default()
        };
        let mut ctl = open(api, FakeChannel::new()).await;
        let before = ctl.thread().messages().to_vec();

        assert!(matches!(ctl.edit("m1", "new").await, Err(ChatError::Api(_))));
        assert!(matches!(ctl.delete("m1").await, Err(ChatError::Api(_))));
        assert_eq!(ctl.thread().messages(), before.as_slice());
    }

    #[tokio::test]
    async fn test_edit_and_delete_are_sender_only() {
        let api = FakeApi {
            history: vec![msg("m0", "u2", "theirs", 0)],
            ..FakeApi::default()
        };
        let mut ctl = open(api, FakeChannel::new()).await;

        assert!(matches!(ctl.edit("m0", "x").await, Err(ChatError::NotSender(_))));
        assert!(matches!(ctl.delete("m0").await, Err(ChatError::NotSender(_))));
        assert!(matches!(ctl.edit("m0", "  ").await, Err(ChatError::EmptyText)));
        assert_eq!(ctl.api.edit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.api.delete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_message() {
        let api = FakeApi {
            history: vec![msg("m1", "u1", "oops", 1)],
            ..FakeApi::default()
        };
        let mut ctl = open(api, FakeChannel::new()).await;

        ctl.delete("m1").await.unwrap();
        assert!(ctl.thread().messages().is_empty());
    }

    #[tokio::test]
    async fn test_close_deregisters_handler() {
        let channel = FakeChannel::new();
        let registry = Arc::clone(&channel.registry);
        let mut ctl = open(FakeApi::default(), channel).await;
        assert_eq!(registry.len(), 1);

        ctl.close();
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.dispatch(&msg("m1", "u2", "late", 1)), 0);
        assert!(ctl.next_push().await.is_none());
    }
}
