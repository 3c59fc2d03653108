//! REST endpoints for direct messages.
//!
//! Sending and read-marking go through the same [`Dispatcher`] as the socket
//! intents, so a REST client produces the same live events a socket client does.
//!
//! [`Dispatcher`]: crate::ws::Dispatcher

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models::Message;
use crate::db::StoreError;
use crate::state::AppState;
use crate::ws::protocol::{SendMessageIntent, UserId};
use crate::ws::DispatchError;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history and search.
const MAX_LIMIT: u32 = 100;
/// Default page size for search results.
const DEFAULT_SEARCH_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

pub(crate) fn store_status(err: StoreError) -> StatusCode {
    tracing::error!(error = %err, "Store operation failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn dispatch_status(err: DispatchError) -> StatusCode {
    match err {
        DispatchError::SelfMessage | DispatchError::EmptyContent => StatusCode::BAD_REQUEST,
        DispatchError::ReceiverNotFound => StatusCode::NOT_FOUND,
        DispatchError::SenderNotFound => StatusCode::UNAUTHORIZED,
        DispatchError::Store(e) => store_status(e),
        DispatchError::Hub(e) => {
            tracing::error!(error = %e, "Hub unavailable");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// POST /api/messages
/// Persists the message, pushes it to the receiver and acks the sender's socket.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageIntent>,
) -> Result<(StatusCode, Json<Message>), StatusCode> {
    let message = state
        .dispatcher
        .send_message(claims.sub, body)
        .await
        .map_err(dispatch_status)?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/{user_id}?limit={n}&offset={n}
/// History between the caller and `user_id`, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<UserId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let messages = state
        .store
        .messages_between(claims.sub, user_id, limit, offset)
        .await
        .map_err(store_status)?;

    Ok(Json(messages))
}

/// GET /api/messages/{user_id}/unread
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<UserId>,
) -> Result<Json<UnreadResponse>, StatusCode> {
    let unread_count = state
        .store
        .unread_count(user_id, claims.sub)
        .await
        .map_err(store_status)?;

    Ok(Json(UnreadResponse { unread_count }))
}

/// PUT /api/messages/{user_id}/read
/// Marks everything `user_id` sent the caller as read and notifies `user_id`.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<UserId>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let updated = state
        .dispatcher
        .mark_read(claims.sub, user_id)
        .await
        .map_err(dispatch_status)?;

    Ok(Json(MarkReadResponse { updated }))
}

/// DELETE /api/messages/{message_id}
/// Only the sender may delete a message.
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let message = state
        .store
        .get_message(message_id)
        .await
        .map_err(store_status)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if message.sender_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    if !state
        .store
        .delete_message(message_id)
        .await
        .map_err(store_status)?
    {
        return Err(StatusCode::NOT_FOUND);
    }

    tracing::info!(message_id, user_id = %claims.sub, "Message deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/messages/search?q={text}&limit={n}&offset={n}
pub async fn search_messages(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let messages = state
        .store
        .search_messages(claims.sub, q, limit, offset)
        .await
        .map_err(store_status)?;

    Ok(Json(messages))
}
