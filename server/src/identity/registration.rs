use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::{normalize_email, normalize_name, store_failure, validate_password};
use crate::auth::password::hash_password;
use crate::auth::session::{start_session, SessionCookies, SessionResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckEmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct CheckEmailResponse {
    pub exists: bool,
    pub email: String,
}

/// POST /api/auth/signup
/// Create an account and sign it in. Emails are unique, compared lowercased.
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, SessionCookies, Json<SessionResponse>), (StatusCode, String)> {
    let name = normalize_name(&req.name).ok_or((
        StatusCode::BAD_REQUEST,
        "Name must be between 2 and 50 characters".to_string(),
    ))?;
    let email = normalize_email(&req.email)
        .ok_or((StatusCode::BAD_REQUEST, "Invalid email address".to_string()))?;
    validate_password(&req.password).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Task join error: {}", e),
            )
        })?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // A duplicate email surfaces as 409
    let user = state
        .accounts
        .create_user(&name, &email, &password_hash)
        .await
        .map_err(store_failure)?;

    tracing::info!(user_id = %user.id, %email, "User registered");

    let (cookies, body) = start_session(&state, user, "User created successfully").await?;
    Ok((StatusCode::CREATED, cookies, body))
}

/// POST /api/auth/check-email
pub async fn check_email(
    State(state): State<AppState>,
    Json(req): Json<CheckEmailRequest>,
) -> Result<Json<CheckEmailResponse>, (StatusCode, String)> {
    let email = normalize_email(&req.email)
        .ok_or((StatusCode::BAD_REQUEST, "Invalid email address".to_string()))?;

    let exists = state
        .accounts
        .find_by_email(&email)
        .await
        .map_err(store_failure)?
        .is_some();

    Ok(Json(CheckEmailResponse { exists, email }))
}
