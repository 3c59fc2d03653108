//! Login sessions: access/refresh token pairs, carried in the JSON body and
//! mirrored into HttpOnly cookies for browser clients.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::AppendHeaders,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::middleware::Claims;
use super::password::{hash_password, verify_password};
use super::verifier::{cookie_value, ACCESS_TOKEN_COOKIE};
use super::jwt;
use crate::db::models::User;
use crate::identity::{normalize_email, store_failure, validate_password};
use crate::state::AppState;
use crate::ws::protocol::UserId;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Refresh cookies are only sent to the auth endpoints.
const REFRESH_COOKIE_PATH: &str = "/api/auth";

pub type SessionCookies = AppendHeaders<[(HeaderName, String); 2]>;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub message: String,
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user_id: UserId,
}

fn cookie(name: &str, value: &str, path: &str, max_age: i64) -> String {
    format!("{name}={value}; Path={path}; Max-Age={max_age}; HttpOnly; SameSite=Lax")
}

fn session_cookies(access_token: &str, refresh_token: &str) -> SessionCookies {
    AppendHeaders([
        (
            header::SET_COOKIE,
            cookie(ACCESS_TOKEN_COOKIE, access_token, "/", jwt::ACCESS_TOKEN_TTL_SECS),
        ),
        (
            header::SET_COOKIE,
            cookie(
                REFRESH_TOKEN_COOKIE,
                refresh_token,
                REFRESH_COOKIE_PATH,
                jwt::REFRESH_TOKEN_TTL_DAYS * 24 * 3600,
            ),
        ),
    ])
}

fn cleared_cookies() -> SessionCookies {
    AppendHeaders([
        (header::SET_COOKIE, cookie(ACCESS_TOKEN_COOKIE, "", "/", 0)),
        (
            header::SET_COOKIE,
            cookie(REFRESH_TOKEN_COOKIE, "", REFRESH_COOKIE_PATH, 0),
        ),
    ])
}

/// Issue and record a new token pair for `user`.
pub(crate) async fn start_session(
    state: &AppState,
    user: User,
    message: &str,
) -> Result<(SessionCookies, Json<SessionResponse>), (StatusCode, String)> {
    let access_token = jwt::issue_access_token(&state.jwt_secret, &user).map_err(|e| {
        tracing::error!(error = %e, "Failed to sign access token");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Could not generate authentication tokens".to_string(),
        )
    })?;
    let (refresh_token, refresh_hash) = jwt::issue_refresh_token();
    let expires_at = Utc::now() + chrono::Duration::days(jwt::REFRESH_TOKEN_TTL_DAYS);

    state
        .accounts
        .store_refresh_token(user.id, &refresh_hash, expires_at)
        .await
        .map_err(store_failure)?;

    Ok((
        session_cookies(&access_token, &refresh_token),
        Json(SessionResponse {
            message: message.to_string(),
            user,
            access_token,
            refresh_token,
            expires_in: jwt::ACCESS_TOKEN_TTL_SECS,
        }),
    ))
}

/// Refresh token from a JSON body, falling back to the refresh_token cookie.
fn presented_refresh_token(headers: &HeaderMap, body: &Bytes) -> Option<String> {
    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(body)
            .ok()
            .and_then(|req| req.refresh_token)
            .filter(|t| !t.is_empty())
    };
    from_body.or_else(|| cookie_value(headers, REFRESH_TOKEN_COOKIE))
}

/// Run an argon2 check off the async workers.
async fn password_matches(password: String, stored_hash: String) -> Result<bool, (StatusCode, String)> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Task join error: {}", e),
            )
        })
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<(SessionCookies, Json<SessionResponse>), (StatusCode, String)> {
    let invalid = || (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string());

    let email = normalize_email(&req.email).ok_or_else(invalid)?;
    let credentials = state
        .accounts
        .find_by_email(&email)
        .await
        .map_err(store_failure)?
        .ok_or_else(invalid)?;

    if !password_matches(req.password, credentials.password_hash).await? {
        tracing::debug!(%email, "Login rejected");
        return Err(invalid());
    }

    tracing::info!(user_id = %credentials.user.id, "User logged in");
    start_session(&state, credentials.user, "Logged in successfully").await
}

/// POST /api/auth/refresh
/// Exchanges a refresh token (body or cookie) for a new pair. The old token
/// is consumed.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(SessionCookies, Json<SessionResponse>), (StatusCode, String)> {
    let token = presented_refresh_token(&headers, &body).ok_or((
        StatusCode::UNAUTHORIZED,
        "No refresh token provided".to_string(),
    ))?;

    let invalid = || {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired refresh token".to_string(),
        )
    };
    let user_id = state
        .accounts
        .consume_refresh_token(&jwt::hash_refresh_token(&token))
        .await
        .map_err(store_failure)?
        .ok_or_else(invalid)?;
    let user = state
        .store
        .get_user_by_id(user_id)
        .await
        .map_err(store_failure)?
        .ok_or_else(invalid)?;

    start_session(&state, user, "Token refreshed successfully").await
}

/// POST /api/auth/logout
/// Revokes the presented refresh token, if any, and clears both cookies.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(SessionCookies, Json<MessageResponse>), (StatusCode, String)> {
    if let Some(token) = presented_refresh_token(&headers, &body) {
        state
            .accounts
            .revoke_refresh_token(&jwt::hash_refresh_token(&token))
            .await
            .map_err(store_failure)?;
    }

    Ok((
        cleared_cookies(),
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}

/// GET /api/auth/validate
pub async fn validate_token(claims: Claims) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        valid: true,
        user_id: claims.sub,
    })
}

/// PUT /api/auth/password
/// Signs out every other session by revoking all refresh tokens.
pub async fn change_password(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let credentials = state
        .accounts
        .credentials(claims.sub)
        .await
        .map_err(store_failure)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    if !password_matches(req.current_password, credentials.password_hash).await? {
        return Err((
            StatusCode::BAD_REQUEST,
            "Current password is incorrect".to_string(),
        ));
    }
    validate_password(&req.new_password).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let new_password = req.new_password;
    let new_hash = tokio::task::spawn_blocking(move || hash_password(&new_password))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Task join error: {}", e),
            )
        })?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    state
        .accounts
        .update_password(claims.sub, &new_hash)
        .await
        .map_err(store_failure)?;
    state
        .accounts
        .revoke_user_refresh_tokens(claims.sub)
        .await
        .map_err(store_failure)?;

    tracing::info!(user_id = %claims.sub, "Password changed");
    Ok(Json(MessageResponse {
        message: "Password changed successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn refresh_token_prefers_body_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("refresh_token=from-cookie"),
        );

        let body = Bytes::from_static(br#"{"refresh_token":"from-body"}"#);
        assert_eq!(
            presented_refresh_token(&headers, &body).as_deref(),
            Some("from-body")
        );
        assert_eq!(
            presented_refresh_token(&headers, &Bytes::new()).as_deref(),
            Some("from-cookie")
        );
        assert_eq!(presented_refresh_token(&HeaderMap::new(), &Bytes::from_static(b"{}")), None);
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let AppendHeaders(cookies) = cleared_cookies();
        assert!(cookies.iter().all(|(_, value)| value.contains("Max-Age=0")));
        assert!(cookies[1].1.contains("Path=/api/auth"));
    }
}
