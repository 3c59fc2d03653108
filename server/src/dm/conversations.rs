use axum::{extract::State, http::StatusCode, Json};

use super::messages::store_status;
use crate::auth::middleware::Claims;
use crate::db::models::Conversation;
use crate::state::AppState;

/// GET /api/conversations
/// One entry per peer the caller has exchanged messages with, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<Conversation>>, StatusCode> {
    let conversations = state
        .store
        .conversations(claims.sub)
        .await
        .map_err(store_status)?;

    Ok(Json(conversations))
}
