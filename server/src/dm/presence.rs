use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::protocol::UserId;

#[derive(Debug, Serialize)]
pub struct OnlineResponse {
    pub online: Vec<UserId>,
}

/// GET /api/online
/// Snapshot of connected users, answered by the hub loop.
pub async fn online_users(
    State(state): State<AppState>,
    _claims: Claims,
) -> Result<Json<OnlineResponse>, StatusCode> {
    let online = state.hub.online_users().await.map_err(|e| {
        tracing::error!(error = %e, "Hub unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(OnlineResponse { online }))
}
