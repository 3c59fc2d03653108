//! Persistence seam for direct messages.
//!
//! Dispatch and the message handlers only see [`ChatStore`]. [`SqliteStore`]
//! backs it with the shared rusqlite connection; every call hops onto
//! `spawn_blocking` so no async task ever holds the connection lock. The
//! same store also implements the account and friendship seams.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use super::models::{Conversation, Message, NewMessage, User};
use super::{DbPool, StoreError};
use crate::ws::protocol::UserId;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn mark_message_as_delivered(&self, message_id: i64) -> Result<(), StoreError>;

    /// Mark every unread message from `sender_id` to `receiver_id` as read.
    /// Returns the number of messages updated.
    async fn mark_messages_as_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<usize, StoreError>;

    /// History between two users, oldest first.
    async fn messages_between(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// One entry per peer, most recent conversation first.
    async fn conversations(&self, user_id: UserId) -> Result<Vec<Conversation>, StoreError>;

    async fn unread_count(&self, sender_id: UserId, receiver_id: UserId) -> Result<i64, StoreError>;

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError>;

    /// Soft-delete a message. Returns false when it did not exist.
    async fn delete_message(&self, message_id: i64) -> Result<bool, StoreError>;

    /// Messages involving `user_id` whose content or participant names match `query`.
    async fn search_messages(
        &self,
        user_id: UserId,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError>;
}

const MESSAGE_COLUMNS: &str = "m.id, m.sender_id, m.receiver_id, m.content, m.message_type,
        m.is_read, m.is_delivered, m.created_at, m.updated_at, s.name, s.email";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        message_type: row.get(4)?,
        is_read: row.get(5)?,
        is_delivered: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        sender_name: row.get(9)?,
        sender_username: row.get(10)?,
    })
}

/// Column order expected by [`user_from_row`].
pub(crate) const USER_COLUMNS: &str = "id, name, email, created_at, updated_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Current time at the precision stored and pushed for messages.
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// `%query%` with LIKE wildcards in `query` escaped, for use with `ESCAPE '\'`.
pub(crate) fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn query_message(conn: &Connection, message_id: i64) -> Result<Option<Message>, StoreError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m JOIN users s ON s.id = m.sender_id
         WHERE m.id = ?1 AND m.deleted_at IS NULL"
    );
    Ok(conn
        .query_row(&sql, rusqlite::params![message_id], message_from_row)
        .optional()?)
}

fn query_latest_between(
    conn: &Connection,
    user_a: UserId,
    user_b: UserId,
) -> Result<Option<Message>, StoreError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m JOIN users s ON s.id = m.sender_id
         WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2) OR (m.sender_id = ?2 AND m.receiver_id = ?1))
           AND m.deleted_at IS NULL
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, rusqlite::params![user_a, user_b], message_from_row)
        .optional()?)
}

fn query_unread(conn: &Connection, sender_id: UserId, receiver_id: UserId) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0 AND deleted_at IS NULL",
        rusqlite::params![sender_id, receiver_id],
        |row| row.get(0),
    )?)
}

/// [`ChatStore`] over the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    rusqlite::params![id],
                    user_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.run(move |conn| {
            let (sender_name, sender_username): (String, String) = conn.query_row(
                "SELECT name, email FROM users WHERE id = ?1",
                rusqlite::params![message.sender_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let now = now_micros();
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, message_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    message.sender_id,
                    message.receiver_id,
                    message.content,
                    message.message_type,
                    now,
                ],
            )?;

            Ok(Message {
                id: conn.last_insert_rowid(),
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                content: message.content,
                message_type: message.message_type,
                is_read: false,
                is_delivered: false,
                created_at: now,
                updated_at: now,
                sender_name,
                sender_username,
            })
        })
        .await
    }

    async fn mark_message_as_delivered(&self, message_id: i64) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE messages SET is_delivered = 1 WHERE id = ?1",
                rusqlite::params![message_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_messages_as_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<usize, StoreError> {
        self.run(move |conn| {
            Ok(conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                rusqlite::params![sender_id, receiver_id],
            )?)
        })
        .await
    }

    async fn messages_between(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m JOIN users s ON s.id = m.sender_id
                 WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2) OR (m.sender_id = ?2 AND m.receiver_id = ?1))
                   AND m.deleted_at IS NULL
                 ORDER BY m.created_at ASC, m.id ASC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map(
                    rusqlite::params![user_a, user_b, limit, offset],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn conversations(&self, user_id: UserId) -> Result<Vec<Conversation>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.peer_id, u.email, u.name, MAX(p.created_at) AS last_at
                 FROM (
                     SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS peer_id,
                            created_at
                     FROM messages
                     WHERE (sender_id = ?1 OR receiver_id = ?1) AND deleted_at IS NULL
                 ) p
                 JOIN users u ON u.id = p.peer_id
                 GROUP BY p.peer_id, u.email, u.name
                 ORDER BY last_at DESC",
            )?;
            let peers = stmt
                .query_map(rusqlite::params![user_id], |row| {
                    Ok((
                        row.get::<_, UserId>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut conversations = Vec::with_capacity(peers.len());
            for (peer_id, username, full_name) in peers {
                conversations.push(Conversation {
                    user_id: peer_id,
                    username,
                    full_name,
                    last_message: query_latest_between(conn, user_id, peer_id)?,
                    unread_count: query_unread(conn, peer_id, user_id)?,
                });
            }
            Ok(conversations)
        })
        .await
    }

    async fn unread_count(&self, sender_id: UserId, receiver_id: UserId) -> Result<i64, StoreError> {
        self.run(move |conn| query_unread(conn, sender_id, receiver_id))
            .await
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        self.run(move |conn| query_message(conn, message_id)).await
    }

    async fn delete_message(&self, message_id: i64) -> Result<bool, StoreError> {
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE messages SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                rusqlite::params![message_id, Utc::now()],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn search_messages(
        &self,
        user_id: UserId,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let pattern = like_pattern(query);
        self.run(move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 JOIN users s ON s.id = m.sender_id
                 JOIN users r ON r.id = m.receiver_id
                 WHERE (m.sender_id = ?1 OR m.receiver_id = ?1)
                   AND m.deleted_at IS NULL
                   AND (m.content LIKE ?2 ESCAPE '\\' OR s.name LIKE ?2 ESCAPE '\\'
                        OR r.name LIKE ?2 ESCAPE '\\')
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map(
                    rusqlite::params![user_id, pattern, limit, offset],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }
}
