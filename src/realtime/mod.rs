//! Realtime channel to the SellPoint messaging backend
//!
//! One Socket.IO connection per signed-in user. The connection runs in a
//! background task that reconnects with exponential backoff; callers only
//! see a connection state, per-conversation subscriptions and an
//! acknowledged `send`.

pub mod frame;
pub mod registry;
pub mod websocket;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::chat::MessageChannel;
use crate::error::ChatError;
use crate::models::{Message, OutgoingMessage, SendAck};
use frame::Packet;
use websocket::SocketIoStream;

pub use registry::{HandlerRegistry, Subscription};

const EVENT_MESSAGE_NEW: &str = "message:new";
const EVENT_MESSAGE_SEND: &str = "message:send";

/// Reconnect delay cap in seconds.
const MAX_BACKOFF_SECS: u64 = 64;

/// How long `disconnect` waits for a graceful close before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Connection lifecycle as seen by callers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

type AckReply = oneshot::Sender<Result<Message, ChatError>>;

enum Command {
    Send {
        conversation_id: String,
        text: String,
        reply: AckReply,
    },
    Shutdown,
}

/// Why a connected session ended.
enum SessionEnd {
    /// Explicit teardown. Do not reconnect.
    Shutdown,
    /// Socket dropped or failed. Reconnect.
    Lost(anyhow::Error),
}

struct Session {
    user_id: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

/// Handlers and the connection they belong to.
///
/// The registry is swapped out whenever the user scope ends, so a task
/// still winding down for a previous user can never reach handlers
/// registered for the next one.
struct Scope {
    registry: Arc<HandlerRegistry>,
    session: Option<Session>,
}

/// Lifecycle-scoped realtime connection.
///
/// Create one per signed-in session and share it (e.g. behind an `Arc`)
/// with everything that needs pushes or sends.
pub struct RealtimeChannel {
    socket_url: String,
    ack_timeout: Duration,
    scope: Mutex<Scope>,
}

impl RealtimeChannel {
    pub fn new(socket_url: &str, ack_timeout: Duration) -> Self {
        Self {
            socket_url: socket_url.to_string(),
            ack_timeout,
            scope: Mutex::new(Scope {
                registry: HandlerRegistry::new(),
                session: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Scope> {
        self.scope.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the connection for `user_id`.
    ///
    /// A no-op while a connection for the same user is alive. Switching to
    /// another user tears the old connection down and releases every
    /// handler registered so far.
    pub fn connect(&self, user_id: &str) {
        let mut scope = self.lock();

        if let Some(session) = scope.session.as_ref() {
            if session.user_id == user_id && !session.task.is_finished() {
                tracing::debug!("Realtime channel already running for {}", user_id);
                return;
            }
        }

        if let Some(old) = scope.session.take() {
            tracing::info!(
                "Switching realtime channel from {} to {}",
                old.user_id,
                user_id
            );
            let stale = std::mem::replace(&mut scope.registry, HandlerRegistry::new());
            stale.clear();
            let _ = old.commands.send(Command::Shutdown);
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let task = tokio::spawn(run_connection(
            self.socket_url.clone(),
            user_id.to_string(),
            Arc::clone(&scope.registry),
            command_rx,
            state_tx,
        ));

        scope.session = Some(Session {
            user_id: user_id.to_string(),
            commands,
            state,
            task,
        });
    }

    /// Tear the connection down and release all handlers.
    pub async fn disconnect(&self) {
        let session = {
            let mut scope = self.lock();
            let stale = std::mem::replace(&mut scope.registry, HandlerRegistry::new());
            stale.clear();
            scope.session.take()
        };
        let Some(session) = session else {
            return;
        };

        let _ = session.commands.send(Command::Shutdown);
        let mut task = session.task;
        if time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            tracing::warn!("Realtime task did not stop in time, aborting");
            task.abort();
        }
        tracing::info!("Realtime channel for {} disconnected", session.user_id);
    }

    pub fn state(&self) -> ConnectionState {
        self.lock()
            .session
            .as_ref()
            .map(|s| *s.state.borrow())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// State updates of the current connection, if any.
    pub fn watch_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.lock().session.as_ref().map(|s| s.state.clone())
    }

    /// Wait until connected. Returns false on timeout or when no
    /// connection was started.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let Some(mut state) = self.watch_state() else {
            return false;
        };
        let reached = state.wait_for(|s| *s == ConnectionState::Connected);
        let connected = matches!(time::timeout(timeout, reached).await, Ok(Ok(_)));
        connected
    }

    /// Receive `message:new` pushes for one conversation.
    pub fn on_message(&self, conversation_id: &str) -> Subscription {
        self.lock().registry.register(conversation_id)
    }

    /// Receive `message:new` pushes for every conversation.
    pub fn on_any_message(&self) -> Subscription {
        self.lock().registry.register_all()
    }

    /// Emit `message:send` and wait for the server's acknowledgement.
    ///
    /// The message is not delivered until this resolves with `Ok`.
    pub async fn send(&self, conversation_id: &str, text: &str) -> Result<Message, ChatError> {
        let commands = {
            let scope = self.lock();
            match scope.session.as_ref() {
                Some(s) if *s.state.borrow() == ConnectionState::Connected => s.commands.clone(),
                _ => return Err(ChatError::NotConnected),
            }
        };

        let (reply, ack) = oneshot::channel();
        commands
            .send(Command::Send {
                conversation_id: conversation_id.to_string(),
                text: text.to_string(),
                reply,
            })
            .map_err(|_| ChatError::NotConnected)?;

        match time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::ChannelClosed),
            Err(_) => Err(ChatError::AckTimeout(self.ack_timeout)),
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(session) = self.lock().session.take() {
            session.task.abort();
        }
    }
}

impl MessageChannel for RealtimeChannel {
    fn is_connected(&self) -> bool {
        RealtimeChannel::is_connected(self)
    }

    fn on_message(&self, conversation_id: &str) -> Subscription {
        RealtimeChannel::on_message(self, conversation_id)
    }

    async fn send(&self, conversation_id: &str, text: &str) -> Result<Message, ChatError> {
        RealtimeChannel::send(self, conversation_id, text).await
    }
}

/// Connection task: connect, serve, and reconnect until shut down.
///
/// Reconnects with exponential backoff (1s, 2s, 4s, ... capped at 64s),
/// reset after every successful connect. Sends issued while not connected
/// are refused immediately.
async fn run_connection(
    socket_url: String,
    user_id: String,
    registry: Arc<HandlerRegistry>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    let mut backoff = 1u64;

    loop {
        state.send_replace(ConnectionState::Connecting);

        let attempt = SocketIoStream::connect(&socket_url, &user_id);
        tokio::pin!(attempt);
        let result = loop {
            tokio::select! {
                result = &mut attempt => break result,
                cmd = commands.recv() => {
                    if !refuse(cmd) {
                        state.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        };

        match result {
            Ok(socket) => {
                backoff = 1;
                state.send_replace(ConnectionState::Connected);
                let end = serve(socket, &registry, &mut commands).await;
                state.send_replace(ConnectionState::Disconnected);
                match end {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Lost(e) => tracing::warn!(
                        "Realtime connection lost: {:#}. Reconnecting in {}s...",
                        e,
                        backoff
                    ),
                }
            }
            Err(e) => {
                state.send_replace(ConnectionState::Disconnected);
                tracing::warn!(
                    "Realtime connect failed: {:#}. Retrying in {}s...",
                    e,
                    backoff
                );
            }
        }

        let delay = time::sleep(Duration::from_secs(backoff));
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                cmd = commands.recv() => {
                    if !refuse(cmd) {
                        return;
                    }
                }
            }
        }

        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
    }
}

/// Handle a command while no socket is up. Returns false on shutdown.
fn refuse(cmd: Option<Command>) -> bool {
    match cmd {
        Some(Command::Send { reply, .. }) => {
            let _ = reply.send(Err(ChatError::NotConnected));
            true
        }
        Some(Command::Shutdown) | None => false,
    }
}

/// Serve one connected socket until it drops or shutdown is requested.
async fn serve(
    mut socket: SocketIoStream,
    registry: &HandlerRegistry,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    // Dropping this map fails every outstanding send with ChannelClosed.
    let mut pending: HashMap<u64, AckReply> = HashMap::new();
    let mut next_ack_id = 0u64;

    loop {
        tokio::select! {
            packet = socket.recv_packet() => match packet {
                Ok(Some(packet)) => handle_packet(packet, registry, &mut pending),
                Ok(None) => return SessionEnd::Lost(anyhow!("Socket closed by server")),
                Err(e) => return SessionEnd::Lost(e),
            },
            cmd = commands.recv() => match cmd {
                Some(Command::Send { conversation_id, text, reply }) => {
                    let outgoing = OutgoingMessage {
                        conversation_id: &conversation_id,
                        text: &text,
                    };
                    let payload = match serde_json::to_value(&outgoing) {
                        Ok(payload) => payload,
                        Err(e) => {
                            let _ = reply.send(Err(ChatError::Protocol(e.to_string())));
                            continue;
                        }
                    };

                    let ack_id = next_ack_id;
                    next_ack_id += 1;
                    if let Err(e) = socket.emit(EVENT_MESSAGE_SEND, Some(ack_id), payload).await {
                        let _ = reply.send(Err(ChatError::ChannelClosed));
                        return SessionEnd::Lost(e);
                    }
                    // Senders that timed out no longer need their slot.
                    pending.retain(|_, waiting| !waiting.is_closed());
                    pending.insert(ack_id, reply);
                }
                Some(Command::Shutdown) | None => {
                    socket.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

fn handle_packet(packet: Packet, registry: &HandlerRegistry, pending: &mut HashMap<u64, AckReply>) {
    match packet {
        Packet::Event { name, args, .. } if name == EVENT_MESSAGE_NEW => {
            match args.into_iter().next().map(serde_json::from_value::<Message>) {
                Some(Ok(message)) => {
                    let delivered = registry.dispatch(&message);
                    tracing::debug!(
                        "{} {:?} in {} delivered to {} handlers",
                        EVENT_MESSAGE_NEW,
                        message.id,
                        message.conversation_id,
                        delivered
                    );
                }
                Some(Err(e)) => tracing::warn!("Malformed {} payload: {}", EVENT_MESSAGE_NEW, e),
                None => tracing::warn!("{} without payload", EVENT_MESSAGE_NEW),
            }
        }
        Packet::Event { name, .. } => {
            tracing::debug!("Ignoring event {}", name);
        }
        Packet::Ack { ack_id, args } => match pending.remove(&ack_id) {
            Some(reply) => {
                let _ = reply.send(parse_send_ack(args));
            }
            None => tracing::debug!("Ack {} has no waiting sender", ack_id),
        },
        other => tracing::debug!("Ignoring packet {:?}", other),
    }
}

fn parse_send_ack(args: Vec<Value>) -> Result<Message, ChatError> {
    let first = args
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::Protocol("empty acknowledgement".to_string()))?;
    let ack: SendAck = serde_json::from_value(first)
        .map_err(|e| ChatError::Protocol(format!("malformed acknowledgement: {}", e)))?;
    match (ack.ok, ack.msg) {
        (true, Some(message)) => Ok(message),
        (true, None) => Err(ChatError::Protocol(
            "acknowledgement without message".to_string(),
        )),
        (false, _) => Err(ChatError::SendRejected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::WebSocketStream;

    type ServerSocket = WebSocketStream<TcpStream>;

    const WAIT: Duration = Duration::from_secs(3);

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Accept one client and complete the Engine.IO + Socket.IO handshake.
    /// Returns the socket and the client's auth payload.
    async fn accept(listener: &TcpListener) -> (ServerSocket, Value) {
        let (tcp, _) = time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(WsMessage::Text(
            r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.to_string(),
        ))
        .await
        .unwrap();

        let auth = match server_recv(&mut ws).await {
            Packet::Connect(Some(auth)) => auth,
            other => panic!("expected connect, got {:?}", other),
        };
        ws.send(WsMessage::Text(r#"40{"sid":"n1"}"#.to_string()))
            .await
            .unwrap();
        (ws, auth)
    }

    async fn server_recv(ws: &mut ServerSocket) -> Packet {
        loop {
            match time::timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(text))) => return Packet::decode(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("client went away: {:?}", other),
            }
        }
    }

    fn push_frame(id: &str, conversation_id: &str) -> WsMessage {
        let packet = Packet::event(
            EVENT_MESSAGE_NEW,
            None,
            json!({
                "_id": id,
                "conversation": conversation_id,
                "from": "u2",
                "to": "u1",
                "text": "is it still available?",
                "createdAt": "2024-05-01T10:00:00Z"
            }),
        );
        WsMessage::Text(packet.encode())
    }

    async fn recv(sub: &mut Subscription) -> Option<Message> {
        time::timeout(WAIT, sub.recv()).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_route_pushes() {
        let (listener, url) = listen().await;
        let channel = RealtimeChannel::new(&url, WAIT);
        let mut c1 = channel.on_message("c1");
        let mut c2 = channel.on_message("c2");
        let mut all = channel.on_any_message();

        assert_eq!(channel.state(), ConnectionState::Disconnected);
        channel.connect("u1");
        let (mut server, auth) = accept(&listener).await;
        assert_eq!(auth, json!({"userId": "u1"}));
        assert!(channel.wait_connected(WAIT).await);

        server.send(push_frame("m1", "c1")).await.unwrap();
        assert_eq!(recv(&mut c1).await.unwrap().id(), Some("m1"));
        assert_eq!(recv(&mut all).await.unwrap().id(), Some("m1"));
        assert!(c2.try_recv().is_none());

        channel.disconnect().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(recv(&mut c2).await.is_none());
    }

    #[tokio::test]
    async fn test_send_resolves_with_acknowledged_message() {
        let (listener, url) = listen().await;
        let channel = RealtimeChannel::new(&url, WAIT);
        channel.connect("u1");
        let (mut server, _) = accept(&listener).await;
        assert!(channel.wait_connected(WAIT).await);

        let server_side = async {
            let (ack_id, args) = match server_recv(&mut server).await {
                Packet::Event { ack_id: Some(id), name, args } => {
                    assert_eq!(name, EVENT_MESSAGE_SEND);
                    (id, args)
                }
                other => panic!("expected message:send, got {:?}", other),
            };
            assert_eq!(args[0], json!({"conversationId": "c1", "text": "hello"}));
            let ack = Packet::Ack {
                ack_id,
                args: vec![json!({"ok": true, "msg": {
                    "_id": "m1", "conversation": "c1", "from": "u1", "to": "u2",
                    "text": "hello", "createdAt": "2024-05-01T10:00:00Z"
                }})],
            };
            server.send(WsMessage::Text(ack.encode())).await.unwrap();
        };

        let (sent, ()) = tokio::join!(channel.send("c1", "hello"), server_side);
        let sent = sent.unwrap();
        assert_eq!(sent.id(), Some("m1"));
        assert_eq!(sent.from, "u1");
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_rejected_and_timeout() {
        let (listener, url) = listen().await;
        let channel = RealtimeChannel::new(&url, Duration::from_millis(300));
        channel.connect("u1");
        let (mut server, _) = accept(&listener).await;
        assert!(channel.wait_connected(WAIT).await);

        let reject = async {
            if let Packet::Event { ack_id: Some(ack_id), .. } = server_recv(&mut server).await {
                let nack = Packet::Ack {
                    ack_id,
                    args: vec![json!({"ok": false})],
                };
                server.send(WsMessage::Text(nack.encode())).await.unwrap();
            }
        };
        let (result, ()) = tokio::join!(channel.send("c1", "first"), reject);
        assert!(matches!(result, Err(ChatError::SendRejected)));

        // Server reads the request but never answers.
        let ignore = async {
            server_recv(&mut server).await;
        };
        let (result, ()) = tokio::join!(channel.send("c1", "second"), ignore);
        assert!(matches!(result, Err(ChatError::AckTimeout(_))));
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let channel = RealtimeChannel::new("http://127.0.0.1:9", WAIT);
        let result = channel.send("c1", "hello").await;
        assert!(matches!(result, Err(ChatError::NotConnected)));
        assert!(!channel.wait_connected(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_engine_ping_is_answered() {
        let (listener, url) = listen().await;
        let channel = RealtimeChannel::new(&url, WAIT);
        channel.connect("u1");
        let (mut server, _) = accept(&listener).await;

        server.send(WsMessage::Text("2".to_string())).await.unwrap();
        assert_eq!(server_recv(&mut server).await, Packet::Pong);
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_user_switch_releases_old_scope() {
        let (listener, url) = listen().await;
        let channel = RealtimeChannel::new(&url, WAIT);
        channel.connect("u1");
        let (mut first, _) = accept(&listener).await;
        assert!(channel.wait_connected(WAIT).await);
        let mut old_sub = channel.on_message("c1");

        // Same user: nothing happens.
        channel.connect("u1");
        assert!(channel.is_connected());

        channel.connect("u2");
        assert!(recv(&mut old_sub).await.is_none());
        assert_eq!(server_recv(&mut first).await, Packet::Disconnect);

        let (mut second, auth) = accept(&listener).await;
        assert_eq!(auth["userId"], "u2");
        assert!(channel.wait_connected(WAIT).await);

        let mut new_sub = channel.on_message("c1");
        second.send(push_frame("m2", "c1")).await.unwrap();
        assert_eq!(recv(&mut new_sub).await.unwrap().id(), Some("m2"));
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnects_and_keeps_handlers() {
        let (listener, url) = listen().await;
        let channel = RealtimeChannel::new(&url, WAIT);
        let mut sub = channel.on_message("c1");
        channel.connect("u1");
        let (server, _) = accept(&listener).await;
        assert!(channel.wait_connected(WAIT).await);

        // Drop the server side; the task reconnects after its first backoff.
        drop(server);
        let (mut server, auth) = accept(&listener).await;
        assert_eq!(auth["userId"], "u1");
        assert!(channel.wait_connected(WAIT).await);

        server.send(push_frame("m3", "c1")).await.unwrap();
        assert_eq!(recv(&mut sub).await.unwrap().id(), Some("m3"));
        channel.disconnect().await;
    }
}
