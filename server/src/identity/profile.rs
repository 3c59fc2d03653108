use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{normalize_email, normalize_name, store_failure};
use crate::auth::middleware::Claims;
use crate::db::models::User;
use crate::state::AppState;

/// Maximum number of users returned by a search.
const SEARCH_LIMIT: u32 = 20;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileUpdatedResponse {
    pub message: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct UserSearchResponse {
    pub users: Vec<User>,
    pub query: String,
    pub count: usize,
}

async fn current_user(state: &AppState, claims: &Claims) -> Result<User, (StatusCode, String)> {
    state
        .store
        .get_user_by_id(claims.sub)
        .await
        .map_err(store_failure)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let user = current_user(&state, &claims).await?;
    Ok(Json(UserResponse { user }))
}

/// PUT /api/users/me
/// Omitted fields keep their current value.
pub async fn update_profile(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileUpdatedResponse>, (StatusCode, String)> {
    let current = current_user(&state, &claims).await?;

    let name = match req.name {
        Some(raw) => normalize_name(&raw).ok_or((
            StatusCode::BAD_REQUEST,
            "Name must be between 2 and 50 characters".to_string(),
        ))?,
        None => current.name,
    };
    let email = match req.email {
        Some(raw) => normalize_email(&raw)
            .ok_or((StatusCode::BAD_REQUEST, "Invalid email address".to_string()))?,
        None => current.email,
    };

    let user = state
        .accounts
        .update_profile(claims.sub, &name, &email)
        .await
        .map_err(store_failure)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    tracing::info!(user_id = %user.id, "Profile updated");
    Ok(Json(ProfileUpdatedResponse {
        message: "Profile updated successfully".to_string(),
        user,
    }))
}

/// GET /api/users/search?q={text}
/// Matches name or email; the caller is never included.
pub async fn search_users(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<UserSearchResponse>, (StatusCode, String)> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Search query is required".to_string(),
        ));
    }

    let users = state
        .accounts
        .search_users(q, claims.sub, SEARCH_LIMIT)
        .await
        .map_err(store_failure)?;

    Ok(Json(UserSearchResponse {
        count: users.len(),
        query: q.to_string(),
        users,
    }))
}
