use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::actor;

/// Optional `?token=JWT`, for clients that cannot set headers on the upgrade.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws
/// The credential is checked before the upgrade; failures get a plain 401
/// and no session is created.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match state
        .verifier
        .extract_identity(&headers, params.token.as_deref())
    {
        Ok(user_id) => user_id,
        Err(err) => {
            tracing::warn!(error = %err, "WebSocket auth failed");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    tracing::info!(user_id = %user_id, "WebSocket connection authenticated");

    ws.max_message_size(state.hub_config.max_message_bytes)
        .on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
}
