//! REST endpoints for the friend graph.
//!
//! POST   /api/friends/requests              send a request ({user_id})
//! GET    /api/friends/requests/pending      incoming pending requests
//! GET    /api/friends/requests/sent         outgoing pending requests
//! PUT    /api/friends/requests/{id}/accept
//! PUT    /api/friends/requests/{id}/reject
//! DELETE /api/friends/{id}                  unfriend, withdraw or unblock
//! POST   /api/friends/block                 block a user ({user_id})
//! GET    /api/friends                       accepted friendships

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::FriendError;
use crate::auth::middleware::Claims;
use crate::db::models::Friendship;
use crate::state::AppState;
use crate::ws::protocol::UserId;

#[derive(Debug, Deserialize)]
pub struct TargetUserRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct FriendshipResponse {
    pub message: String,
    pub friendship: Friendship,
}

#[derive(Debug, Serialize)]
pub struct FriendsResponse {
    pub friends: Vec<Friendship>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RequestsResponse {
    pub requests: Vec<Friendship>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn friend_failure(err: FriendError) -> (StatusCode, String) {
    let status = match &err {
        FriendError::UserNotFound | FriendError::NotFound => StatusCode::NOT_FOUND,
        FriendError::Forbidden => StatusCode::FORBIDDEN,
        FriendError::Store(e) => {
            tracing::error!(error = %e, "Friend store operation failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
        _ => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string())
}

fn with_message(message: &str, friendship: Friendship) -> Json<FriendshipResponse> {
    Json(FriendshipResponse {
        message: message.to_string(),
        friendship,
    })
}

/// POST /api/friends/requests
pub async fn send_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<TargetUserRequest>,
) -> Result<(StatusCode, Json<FriendshipResponse>), (StatusCode, String)> {
    let friendship = state
        .friends
        .send_request(claims.sub, req.user_id)
        .await
        .map_err(friend_failure)?;
    Ok((
        StatusCode::CREATED,
        with_message("Friend request sent successfully", friendship),
    ))
}

/// GET /api/friends/requests/pending
pub async fn pending_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<RequestsResponse>, (StatusCode, String)> {
    let requests = state.friends.pending(claims.sub).await.map_err(friend_failure)?;
    Ok(Json(RequestsResponse {
        count: requests.len(),
        requests,
    }))
}

/// GET /api/friends/requests/sent
pub async fn sent_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<RequestsResponse>, (StatusCode, String)> {
    let requests = state.friends.sent(claims.sub).await.map_err(friend_failure)?;
    Ok(Json(RequestsResponse {
        count: requests.len(),
        requests,
    }))
}

/// PUT /api/friends/requests/{id}/accept
pub async fn accept_request(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> Result<Json<FriendshipResponse>, (StatusCode, String)> {
    let friendship = state
        .friends
        .accept(id, claims.sub)
        .await
        .map_err(friend_failure)?;
    Ok(with_message("Friend request accepted", friendship))
}

/// PUT /api/friends/requests/{id}/reject
pub async fn reject_request(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> Result<Json<FriendshipResponse>, (StatusCode, String)> {
    let friendship = state
        .friends
        .reject(id, claims.sub)
        .await
        .map_err(friend_failure)?;
    Ok(with_message("Friend request rejected", friendship))
}

/// DELETE /api/friends/{id}
pub async fn remove_friend(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    state
        .friends
        .remove(id, claims.sub)
        .await
        .map_err(friend_failure)?;
    Ok(Json(MessageResponse {
        message: "Friend removed successfully".to_string(),
    }))
}

/// POST /api/friends/block
pub async fn block_user(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<TargetUserRequest>,
) -> Result<Json<FriendshipResponse>, (StatusCode, String)> {
    let friendship = state
        .friends
        .block(claims.sub, req.user_id)
        .await
        .map_err(friend_failure)?;
    Ok(with_message("User blocked successfully", friendship))
}

/// GET /api/friends
pub async fn list_friends(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<FriendsResponse>, (StatusCode, String)> {
    let friends = state.friends.friends(claims.sub).await.map_err(friend_failure)?;
    Ok(Json(FriendsResponse {
        count: friends.len(),
        friends,
    }))
}
