//! Socket.IO WebSocket connection and frame handling

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::frame::Packet;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One authenticated Socket.IO session on the default namespace.
pub struct SocketIoStream {
    stream: WsStream,
}

impl SocketIoStream {
    /// Open the WebSocket transport and join the default namespace as
    /// `user_id`.
    ///
    /// Completes once the server accepted the CONNECT packet.
    pub async fn connect(socket_url: &str, user_id: &str) -> Result<Self> {
        let ws_url = engine_url(socket_url);
        tracing::info!("Connecting WebSocket to {}", ws_url);

        let (stream, response) = connect_async(ws_url.as_str())
            .await
            .context("WebSocket connection failed")?;
        tracing::info!("WebSocket connected (status={})", response.status());

        let mut socket = Self { stream };

        match socket.recv_packet().await? {
            Some(Packet::Open(info)) => tracing::debug!("Engine.IO open: {}", info),
            Some(other) => bail!("Expected Engine.IO open packet, got {:?}", other),
            None => bail!("Connection closed before Engine.IO handshake"),
        }

        let auth = serde_json::json!({ "userId": user_id });
        socket.send_packet(&Packet::Connect(Some(auth))).await?;

        loop {
            match socket.recv_packet().await? {
                Some(Packet::Connect(_)) => break,
                Some(Packet::ConnectError(reason)) => {
                    bail!("Socket.IO connect refused: {}", reason)
                }
                Some(Packet::Noop) => continue,
                Some(other) => bail!("Expected Socket.IO connect ack, got {:?}", other),
                None => bail!("Connection closed before Socket.IO connect ack"),
            }
        }

        tracing::info!("Socket.IO session established for {}", user_id);
        Ok(socket)
    }

    /// Send one packet.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let text = packet.encode();
        tracing::debug!("WS send: {}", text);
        self.stream
            .send(WsMessage::Text(text))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Emit an event with a single JSON argument.
    pub async fn emit(&mut self, name: &str, ack_id: Option<u64>, payload: Value) -> Result<()> {
        self.send_packet(&Packet::event(name, ack_id, payload)).await
    }

    /// Receive the next application-level packet.
    ///
    /// Engine.IO pings are answered here and never returned. WebSocket
    /// pings get a pong. Returns `None` when the server closed the
    /// connection.
    pub async fn recv_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    let packet = match Packet::decode(&text) {
                        Ok(packet) => packet,
                        Err(e) => {
                            tracing::warn!("Skipping undecodable frame: {}", e);
                            continue;
                        }
                    };
                    match packet {
                        Packet::Ping => {
                            self.send_packet(&Packet::Pong)
                                .await
                                .context("Failed to answer Engine.IO ping")?;
                        }
                        Packet::Close | Packet::Disconnect => {
                            tracing::info!("Server ended the Socket.IO session");
                            return Ok(None);
                        }
                        other => return Ok(Some(other)),
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    self.stream
                        .send(WsMessage::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    /// Leave the namespace and close the WebSocket.
    pub async fn close(mut self) {
        if let Err(e) = self.send_packet(&Packet::Disconnect).await {
            tracing::debug!("Disconnect packet not sent: {:#}", e);
        }
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {:#}", e);
        }
    }
}

/// Engine.IO WebSocket endpoint for a Socket.IO server base URL.
fn engine_url(socket_url: &str) -> String {
    let base = socket_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{}/socket.io/?EIO=4&transport=websocket", base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_url() {
        assert_eq!(
            engine_url("http://localhost:4000"),
            "ws://localhost:4000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_url("https://chat.sellpoint.example/"),
            "wss://chat.sellpoint.example/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_url("ws://127.0.0.1:9"),
            "ws://127.0.0.1:9/socket.io/?EIO=4&transport=websocket"
        );
    }
}
