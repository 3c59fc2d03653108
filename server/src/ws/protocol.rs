//! JSON wire format for the real-time socket.
//!
//! Every frame is `{"type": <tag>, "payload": {...}}`. Inbound frames decode
//! into [`ClientIntent`], outbound frames are encoded from [`ServerEvent`].
//! Decoding is forgiving: anything that does not match a known intent is
//! reported as an error to the caller, which drops the frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::Message;

/// Identity of a registered account.
pub type UserId = i64;

/// Events pushed from the server to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(MessagePayload),
    MessageRead(ReadReceipt),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
    UserOnline(PresencePayload),
    UserOffline(PresencePayload),
    Error(ErrorPayload),
    /// Confirmation to the sender that the message was persisted.
    #[serde(rename = "message_sent")]
    Ack(MessagePayload),
}

impl ServerEvent {
    /// Wire tag of this event.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageRead(_) => "message_read",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::Error(_) => "error",
            Self::Ack(_) => "message_sent",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_delivered: bool,
    pub sender_name: String,
    pub sender_username: String,
}

impl From<&Message> for MessagePayload {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            message_type: message.message_type.clone(),
            timestamp: message.created_at,
            updated_at: message.updated_at,
            is_delivered: message.is_delivered,
            sender_name: message.sender_name.clone(),
            sender_username: message.sender_username.clone(),
        }
    }
}

/// Sent to the original sender once the receiver has read their messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Intents sent by a client over its socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientIntent {
    SendMessage(SendMessageIntent),
    Typing(TypingIntent),
    StopTyping(TypingIntent),
    MarkRead(MarkReadIntent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageIntent {
    pub receiver_id: UserId,
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIntent {
    pub receiver_id: UserId,
}

/// `sender_id` is the peer whose messages the caller has read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadIntent {
    pub sender_id: UserId,
}

/// Decode one inbound text frame.
pub fn decode_intent(frame: &str) -> Result<ClientIntent, serde_json::Error> {
    serde_json::from_str(frame)
}

/// Encode one outbound event as a text frame.
pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
