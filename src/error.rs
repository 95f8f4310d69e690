//! Error taxonomy for the chat core

use std::time::Duration;

/// Failures surfaced by the chat core to its callers.
///
/// REST plumbing stays on `anyhow` and is wrapped in [`ChatError::Api`] when
/// it crosses into the reconciliation layer.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("realtime channel is not connected")]
    NotConnected,

    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    #[error("message rejected by the server")]
    SendRejected,

    #[error("realtime channel closed before acknowledgement")]
    ChannelClosed,

    #[error("message text is empty")]
    EmptyText,

    #[error("message {0} is not in this thread")]
    UnknownMessage(String),

    #[error("only the sender may modify message {0}")]
    NotSender(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}
