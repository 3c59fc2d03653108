//! Row types for the SQLite schema defined in migrations.rs.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::ws::protocol::UserId;

/// Default `message_type` when a client leaves it out.
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

/// Account record in the users table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direct message, joined with its sender's name and email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: String,
    pub is_read: bool,
    pub is_delivered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sender_name: String,
    pub sender_username: String,
}

/// Input for `ChatStore::create_message`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: String,
}

/// One entry of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}

/// A user together with the stored password hash. Never serialized.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
}

/// State of the relationship between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
    Blocked,
}

impl FriendshipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Blocked => "blocked",
        }
    }
}

impl ToSql for FriendshipStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FriendshipStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "blocked" => Ok(Self::Blocked),
            other => Err(FromSqlError::Other(
                format!("unknown friendship status {other:?}").into(),
            )),
        }
    }
}

/// Row of the friendships table, joined with both participants.
///
/// For a `Blocked` row the requester is the user who blocked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Friendship {
    pub id: i64,
    pub requester_id: UserId,
    pub addressee_id: UserId,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub requester: User,
    pub addressee: User,
}

impl Friendship {
    pub fn involves(&self, user_id: UserId) -> bool {
        self.requester_id == user_id || self.addressee_id == user_id
    }
}
