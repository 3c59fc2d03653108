//! Friendship persistence. Rows are joined with both participants so the
//! REST layer can return them without extra lookups.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::models::{Friendship, FriendshipStatus, User};
use crate::db::store::{now_micros, SqliteStore};
use crate::db::StoreError;
use crate::ws::protocol::UserId;

#[async_trait]
pub trait FriendStore: Send + Sync {
    async fn friendship(&self, id: i64) -> Result<Option<Friendship>, StoreError>;

    /// The row for the unordered pair `{a, b}`, whoever requested it.
    async fn friendship_between(&self, a: UserId, b: UserId) -> Result<Option<Friendship>, StoreError>;

    async fn create_friendship(
        &self,
        requester: UserId,
        addressee: UserId,
        status: FriendshipStatus,
    ) -> Result<Friendship, StoreError>;

    /// Overwrite direction and status of an existing row.
    async fn set_friendship(
        &self,
        id: i64,
        requester: UserId,
        addressee: UserId,
        status: FriendshipStatus,
    ) -> Result<Option<Friendship>, StoreError>;

    async fn delete_friendship(&self, id: i64) -> Result<bool, StoreError>;

    /// Accepted friendships of `user`, on either side.
    async fn friends(&self, user: UserId) -> Result<Vec<Friendship>, StoreError>;

    /// Pending requests addressed to `user`.
    async fn pending_for(&self, user: UserId) -> Result<Vec<Friendship>, StoreError>;

    /// Pending requests sent by `user`.
    async fn sent_by(&self, user: UserId) -> Result<Vec<Friendship>, StoreError>;
}

const FRIENDSHIP_SELECT: &str = "SELECT f.id, f.requester_id, f.addressee_id, f.status, f.created_at, f.updated_at,
        r.id, r.name, r.email, r.created_at, r.updated_at,
        a.id, a.name, a.email, a.created_at, a.updated_at
     FROM friendships f
     JOIN users r ON r.id = f.requester_id
     JOIN users a ON a.id = f.addressee_id";

fn user_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        created_at: row.get(offset + 3)?,
        updated_at: row.get(offset + 4)?,
    })
}

fn friendship_from_row(row: &Row<'_>) -> rusqlite::Result<Friendship> {
    Ok(Friendship {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        addressee_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        requester: user_at(row, 6)?,
        addressee: user_at(row, 11)?,
    })
}

fn query_friendship(conn: &Connection, id: i64) -> Result<Option<Friendship>, StoreError> {
    Ok(conn
        .query_row(
            &format!("{FRIENDSHIP_SELECT} WHERE f.id = ?1"),
            rusqlite::params![id],
            friendship_from_row,
        )
        .optional()?)
}

fn query_list(
    conn: &Connection,
    filter: &str,
    user: UserId,
    status: FriendshipStatus,
) -> Result<Vec<Friendship>, StoreError> {
    let sql = format!("{FRIENDSHIP_SELECT} WHERE {filter} AND f.status = ?2 ORDER BY f.updated_at DESC, f.id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![user, status], friendship_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[async_trait]
impl FriendStore for SqliteStore {
    async fn friendship(&self, id: i64) -> Result<Option<Friendship>, StoreError> {
        self.run(move |conn| query_friendship(conn, id)).await
    }

    async fn friendship_between(&self, a: UserId, b: UserId) -> Result<Option<Friendship>, StoreError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "{FRIENDSHIP_SELECT}
                         WHERE (f.requester_id = ?1 AND f.addressee_id = ?2)
                            OR (f.requester_id = ?2 AND f.addressee_id = ?1)"
                    ),
                    rusqlite::params![a, b],
                    friendship_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn create_friendship(
        &self,
        requester: UserId,
        addressee: UserId,
        status: FriendshipStatus,
    ) -> Result<Friendship, StoreError> {
        self.run(move |conn| {
            let now = now_micros();
            conn.execute(
                "INSERT INTO friendships (requester_id, addressee_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![requester, addressee, status, now],
            )?;
            query_friendship(conn, conn.last_insert_rowid())?
                .ok_or(StoreError::Database(rusqlite::Error::QueryReturnedNoRows))
        })
        .await
    }

    async fn set_friendship(
        &self,
        id: i64,
        requester: UserId,
        addressee: UserId,
        status: FriendshipStatus,
    ) -> Result<Option<Friendship>, StoreError> {
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE friendships
                 SET requester_id = ?2, addressee_id = ?3, status = ?4, updated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![id, requester, addressee, status, now_micros()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_friendship(conn, id)
        })
        .await
    }

    async fn delete_friendship(&self, id: i64) -> Result<bool, StoreError> {
        self.run(move |conn| {
            let deleted = conn.execute("DELETE FROM friendships WHERE id = ?1", rusqlite::params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn friends(&self, user: UserId) -> Result<Vec<Friendship>, StoreError> {
        self.run(move |conn| {
            query_list(
                conn,
                "(f.requester_id = ?1 OR f.addressee_id = ?1)",
                user,
                FriendshipStatus::Accepted,
            )
        })
        .await
    }

    async fn pending_for(&self, user: UserId) -> Result<Vec<Friendship>, StoreError> {
        self.run(move |conn| query_list(conn, "f.addressee_id = ?1", user, FriendshipStatus::Pending))
            .await
    }

    async fn sent_by(&self, user: UserId) -> Result<Vec<Friendship>, StoreError> {
        self.run(move |conn| query_list(conn, "f.requester_id = ?1", user, FriendshipStatus::Pending))
            .await
    }
}
