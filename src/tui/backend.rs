//! Async backend: bridges the TUI event loop with REST and realtime calls.
//!
//! Uses an mpsc channel pair. The TUI sends `BackendCommand` values, and a
//! background tokio task executes them and sends `BackendResponse` values back.
//! Thread-scoped work carries the generation of the thread that asked for
//! it, so the TUI can drop results that arrive after the user moved on.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::api::client::ApiClient;
use crate::chat::{fetch_thread, send_read_receipt, ChatApi};
use crate::error::ChatError;
use crate::models::{Conversation, ListingFilter, Message};
use crate::realtime::RealtimeChannel;

/// Commands sent from the TUI event loop to the async backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    LoadConversations {
        filter: ListingFilter,
    },
    OpenThread {
        generation: u64,
        conversation_id: String,
        limit: usize,
    },
    SendMessage {
        generation: u64,
        conversation_id: String,
        text: String,
    },
    EditMessage {
        generation: u64,
        message_id: String,
        text: String,
    },
    DeleteMessage {
        generation: u64,
        message_id: String,
    },
}

/// Responses from the async backend to the TUI.
pub enum BackendResponse {
    Conversations {
        filter: ListingFilter,
        result: Result<Vec<Conversation>>,
    },
    ThreadLoaded {
        generation: u64,
        conversation: Option<Conversation>,
        history: Vec<Message>,
        read_receipt_sent: bool,
    },
    MessageSent {
        generation: u64,
        result: Result<Message, ChatError>,
    },
    MessageEdited {
        generation: u64,
        message_id: String,
        text: String,
        result: Result<Message>,
    },
    MessageDeleted {
        generation: u64,
        message_id: String,
        result: Result<()>,
    },
}

/// Handle for interacting with the backend from the TUI side.
pub struct Backend {
    cmd_tx: mpsc::UnboundedSender<BackendCommand>,
    resp_rx: mpsc::UnboundedReceiver<BackendResponse>,
}

impl Backend {
    /// Start the backend. Spawns a tokio task that processes commands.
    pub fn start(client: Arc<ApiClient>, channel: Arc<RealtimeChannel>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();

        tokio::spawn(backend_loop(client, channel, cmd_rx, resp_tx));

        Self { cmd_tx, resp_rx }
    }

    /// Send a command to the backend (non-blocking).
    pub fn send(&self, cmd: BackendCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Backend channel closed -- command dropped");
        }
    }

    /// Receive a response from the backend.
    ///
    /// Suspends until a response is available. Designed to be used inside
    /// `tokio::select!`.
    pub async fn recv(&mut self) -> Option<BackendResponse> {
        self.resp_rx.recv().await
    }
}

/// Background loop that processes commands.
async fn backend_loop(
    client: Arc<ApiClient>,
    channel: Arc<RealtimeChannel>,
    mut cmd_rx: mpsc::UnboundedReceiver<BackendCommand>,
    resp_tx: mpsc::UnboundedSender<BackendResponse>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        let client = Arc::clone(&client);
        let channel = Arc::clone(&channel);
        let resp_tx = resp_tx.clone();

        // Spawn each command as a separate task so we don't block the loop.
        tokio::spawn(async move {
            let response = execute(&client, &channel, cmd).await;
            let _ = resp_tx.send(response);
        });
    }
}

async fn execute(
    client: &ApiClient,
    channel: &RealtimeChannel,
    cmd: BackendCommand,
) -> BackendResponse {
    match cmd {
        BackendCommand::LoadConversations { filter } => BackendResponse::Conversations {
            filter,
            result: client.list_conversations(filter).await,
        },
        BackendCommand::OpenThread {
            generation,
            conversation_id,
            limit,
        } => {
            let (conversation, history) = fetch_thread(client, &conversation_id, limit).await;
            let read_receipt_sent = send_read_receipt(client, &conversation_id).await;
            BackendResponse::ThreadLoaded {
                generation,
                conversation,
                history,
                read_receipt_sent,
            }
        }
        BackendCommand::SendMessage {
            generation,
            conversation_id,
            text,
        } => BackendResponse::MessageSent {
            generation,
            result: channel.send(&conversation_id, &text).await,
        },
        BackendCommand::EditMessage {
            generation,
            message_id,
            text,
        } => {
            let result = client.edit_message(&message_id, &text).await;
            BackendResponse::MessageEdited {
                generation,
                message_id,
                text,
                result,
            }
        }
        BackendCommand::DeleteMessage {
            generation,
            message_id,
        } => {
            let result = client.delete_message(&message_id).await;
            BackendResponse::MessageDeleted {
                generation,
                message_id,
                result,
            }
        }
    }
}
