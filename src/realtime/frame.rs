//! Socket.IO v4 packet codec over Engine.IO v4 text frames.
//!
//! Engine.IO framing:
//! 0{json} : open handshake
//! 1 : close
//! 2 / 3 : ping / pong
//! 4<socket.io packet> : message
//! 6 : noop
//!
//! Socket.IO framing inside `4`:
//! 0[{json}] : connect (client auth / server sid)
//! 1 : disconnect
//! 2[ack id][json array] : event, `["name", args...]`
//! 3<ack id>[json array] : ack
//! 4{json} : connect error
//!
//! Only the default namespace is used; a `/nsp,` prefix is tolerated and
//! ignored. Binary packets are not supported.

use serde_json::Value;

use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event {
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl Packet {
    /// Event carrying a single JSON argument.
    pub fn event(name: &str, ack_id: Option<u64>, payload: Value) -> Self {
        Packet::Event {
            ack_id,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    /// Encode into an Engine.IO text frame.
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(v) => format!("0{}", v),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(v)) => format!("40{}", v),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { ack_id, name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!("42{}{}", ack_prefix(*ack_id), Value::Array(array))
            }
            Packet::Ack { ack_id, args } => {
                format!("43{}{}", ack_id, Value::Array(args.clone()))
            }
            Packet::ConnectError(v) => format!("44{}", v),
        }
    }

    /// Decode an Engine.IO text frame.
    pub fn decode(frame: &str) -> Result<Self, ChatError> {
        let mut chars = frame.chars();
        let engine_type = chars
            .next()
            .ok_or_else(|| ChatError::Protocol("empty frame".to_string()))?;
        let rest = chars.as_str();

        match engine_type {
            '0' => Ok(Packet::Open(parse_json(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socketio(rest),
            '5' | '6' => Ok(Packet::Noop),
            other => Err(ChatError::Protocol(format!(
                "unknown engine packet type {:?}",
                other
            ))),
        }
    }
}

fn ack_prefix(ack_id: Option<u64>) -> String {
    ack_id.map(|id| id.to_string()).unwrap_or_default()
}

fn parse_json(s: &str) -> Result<Value, ChatError> {
    serde_json::from_str(s).map_err(|e| ChatError::Protocol(format!("bad JSON payload: {}", e)))
}

fn decode_socketio(packet: &str) -> Result<Packet, ChatError> {
    let mut chars = packet.chars();
    let packet_type = chars
        .next()
        .ok_or_else(|| ChatError::Protocol("empty socket.io packet".to_string()))?;
    let mut rest = chars.as_str();

    // Namespace, e.g. "/admin,". Only the default namespace is used.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(pos) => &rest[pos + 1..],
            None => "",
        };
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let ack_id = if digits > 0 {
        Some(
            rest[..digits]
                .parse::<u64>()
                .map_err(|e| ChatError::Protocol(format!("bad ack id: {}", e)))?,
        )
    } else {
        None
    };
    let payload = &rest[digits..];

    match packet_type {
        '0' if payload.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(parse_json(payload)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let mut args = parse_array(payload)?;
            if args.is_empty() {
                return Err(ChatError::Protocol("event without a name".to_string()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(ChatError::Protocol(format!(
                        "event name is not a string: {}",
                        other
                    )))
                }
            };
            Ok(Packet::Event { ack_id, name, args })
        }
        '3' => {
            let ack_id =
                ack_id.ok_or_else(|| ChatError::Protocol("ack without an id".to_string()))?;
            Ok(Packet::Ack {
                ack_id,
                args: parse_array(payload)?,
            })
        }
        '4' => Ok(Packet::ConnectError(if payload.is_empty() {
            Value::Null
        } else {
            parse_json(payload)?
        })),
        '5' | '6' => Err(ChatError::Protocol(
            "binary socket.io packets are not supported".to_string(),
        )),
        other => Err(ChatError::Protocol(format!(
            "unknown socket.io packet type {:?}",
            other
        ))),
    }
}

fn parse_array(s: &str) -> Result<Vec<Value>, ChatError> {
    match parse_json(s)? {
        Value::Array(items) => Ok(items),
        other => Err(ChatError::Protocol(format!("expected JSON array, got {}", other))),
    }
}
