//! Account persistence: credentials, profiles and refresh tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::models::{Credentials, User};
use super::store::{like_pattern, now_micros, user_from_row, SqliteStore, USER_COLUMNS};
use super::StoreError;
use crate::ws::protocol::UserId;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a user. Fails with [`StoreError::EmailTaken`] on a duplicate email.
    async fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Credentials>, StoreError>;

    async fn credentials(&self, user_id: UserId) -> Result<Option<Credentials>, StoreError>;

    async fn update_password(&self, user_id: UserId, password_hash: &str) -> Result<(), StoreError>;

    /// Change name and email. Returns `None` when the user does not exist.
    async fn update_profile(
        &self,
        user_id: UserId,
        name: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Users other than `exclude` whose name or email contains `query`.
    async fn search_users(&self, query: &str, exclude: UserId, limit: u32) -> Result<Vec<User>, StoreError>;

    async fn store_refresh_token(
        &self,
        user_id: UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete an unexpired refresh token and return its owner. Each token is
    /// single-use.
    async fn consume_refresh_token(&self, token_hash: &str) -> Result<Option<UserId>, StoreError>;

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<(), StoreError>;

    /// Drop every refresh token of `user_id`, signing out all sessions.
    async fn revoke_user_refresh_tokens(&self, user_id: UserId) -> Result<(), StoreError>;
}

fn email_in_use(conn: &Connection, email: &str, except: Option<UserId>) -> Result<bool, StoreError> {
    let owner: Option<UserId> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1",
            rusqlite::params![email],
            |row| row.get(0),
        )
        .optional()?;
    Ok(matches!(owner, Some(id) if Some(id) != except))
}

fn credentials_where(
    conn: &Connection,
    filter: &str,
    param: &dyn rusqlite::ToSql,
) -> Result<Option<Credentials>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE {filter}");
    Ok(conn
        .query_row(&sql, rusqlite::params![param], |row| {
            Ok(Credentials {
                user: user_from_row(row)?,
                password_hash: row.get(5)?,
            })
        })
        .optional()?)
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let name = name.to_string();
        let email = email.to_string();
        let password_hash = password_hash.to_string();
        self.run(move |conn| {
            if email_in_use(conn, &email, None)? {
                return Err(StoreError::EmailTaken);
            }
            let now = now_micros();
            conn.execute(
                "INSERT INTO users (name, email, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![name, email, password_hash, now],
            )?;
            Ok(User {
                id: conn.last_insert_rowid(),
                name,
                email,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        let email = email.to_string();
        self.run(move |conn| credentials_where(conn, "email = ?1", &email))
            .await
    }

    async fn credentials(&self, user_id: UserId) -> Result<Option<Credentials>, StoreError> {
        self.run(move |conn| credentials_where(conn, "id = ?1", &user_id))
            .await
    }

    async fn update_password(&self, user_id: UserId, password_hash: &str) -> Result<(), StoreError> {
        let password_hash = password_hash.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![user_id, password_hash, now_micros()],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        name: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        let name = name.to_string();
        let email = email.to_string();
        self.run(move |conn| {
            if email_in_use(conn, &email, Some(user_id))? {
                return Err(StoreError::EmailTaken);
            }
            let updated = conn.execute(
                "UPDATE users SET name = ?2, email = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![user_id, name, email, now_micros()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            Ok(conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    rusqlite::params![user_id],
                    user_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn search_users(&self, query: &str, exclude: UserId, limit: u32) -> Result<Vec<User>, StoreError> {
        let pattern = like_pattern(query);
        self.run(move |conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id <> ?1 AND (name LIKE ?2 ESCAPE '\\' OR email LIKE ?2 ESCAPE '\\')
                 ORDER BY name ASC, id ASC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map(rusqlite::params![exclude, pattern, limit], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    async fn store_refresh_token(
        &self,
        user_id: UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let token_hash = token_hash.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO refresh_tokens (user_id, token_hash, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, token_hash, expires_at, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn consume_refresh_token(&self, token_hash: &str) -> Result<Option<UserId>, StoreError> {
        let token_hash = token_hash.to_string();
        self.run(move |conn| {
            let found: Option<(i64, UserId, DateTime<Utc>)> = conn
                .query_row(
                    "SELECT id, user_id, expires_at FROM refresh_tokens WHERE token_hash = ?1",
                    rusqlite::params![token_hash],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((id, user_id, expires_at)) = found else {
                return Ok(None);
            };

            conn.execute("DELETE FROM refresh_tokens WHERE id = ?1", rusqlite::params![id])?;
            Ok((expires_at > Utc::now()).then_some(user_id))
        })
        .await
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<(), StoreError> {
        let token_hash = token_hash.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM refresh_tokens WHERE token_hash = ?1",
                rusqlite::params![token_hash],
            )?;
            Ok(())
        })
        .await
    }

    async fn revoke_user_refresh_tokens(&self, user_id: UserId) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM refresh_tokens WHERE user_id = ?1",
                rusqlite::params![user_id],
            )?;
            Ok(())
        })
        .await
    }
}
