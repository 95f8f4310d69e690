//! Message-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message inside one conversation.
///
/// `id` is assigned by the backend; it is only absent on payloads that
/// have not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "conversation", alias = "conversationId")]
    pub conversation_id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether `user_id` authored this message.
    pub fn is_from(&self, user_id: &str) -> bool {
        self.from == user_id
    }
}

/// Payload of the `message:send` realtime request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage<'a> {
    pub conversation_id: &'a str,
    pub text: &'a str,
}

/// Acknowledgement returned for `message:send`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub msg: Option<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let json = r#"{
            "_id": "m1",
            "conversation": "c1",
            "from": "u1",
            "to": "u2",
            "text": "hello",
            "createdAt": "2024-05-01T10:00:00.000Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id(), Some("m1"));
        assert_eq!(msg.conversation_id, "c1");
        assert!(msg.is_from("u1"));
        assert!(!msg.is_from("u2"));
    }

    #[test]
    fn test_message_without_id() {
        let json = r#"{
            "conversationId": "c1",
            "from": "u1",
            "to": "u2",
            "text": "draft",
            "createdAt": "2024-05-01T10:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id(), None);
        assert_eq!(msg.conversation_id, "c1");
    }

    #[test]
    fn test_send_ack_failure_has_no_message() {
        let ack: SendAck = serde_json::from_str(r#"{"ok":false}"#).unwrap();
        assert!(!ack.ok);
        assert!(ack.msg.is_none());
    }

    #[test]
    fn test_outgoing_message_shape() {
        let out = OutgoingMessage {
            conversation_id: "c1",
            text: "hi",
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value, serde_json::json!({"conversationId": "c1", "text": "hi"}));
    }
}
