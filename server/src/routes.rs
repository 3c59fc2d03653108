use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::auth::session;
use crate::dm::{conversations, messages, presence};
use crate::friends::routes as friends;
use crate::identity::{profile, registration};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Public auth routes (no JWT required)
    let public_routes = Router::new()
        .route("/api/auth/signup", axum::routing::post(registration::signup))
        .route("/api/auth/login", axum::routing::post(session::login))
        .route("/api/auth/refresh", axum::routing::post(session::refresh))
        .route("/api/auth/logout", axum::routing::post(session::logout))
        .route(
            "/api/auth/check-email",
            axum::routing::post(registration::check_email),
        );

    let account_routes = Router::new()
        .route("/api/auth/me", axum::routing::get(profile::me))
        .route("/api/auth/validate", axum::routing::get(session::validate_token))
        .route("/api/auth/password", axum::routing::put(session::change_password))
        .route("/api/users/me", axum::routing::put(profile::update_profile))
        .route("/api/users/search", axum::routing::get(profile::search_users));

    let friend_routes = Router::new()
        .route("/api/friends", axum::routing::get(friends::list_friends))
        .route("/api/friends/{id}", axum::routing::delete(friends::remove_friend))
        .route("/api/friends/block", axum::routing::post(friends::block_user))
        .route(
            "/api/friends/requests",
            axum::routing::post(friends::send_request),
        )
        .route(
            "/api/friends/requests/pending",
            axum::routing::get(friends::pending_requests),
        )
        .route(
            "/api/friends/requests/sent",
            axum::routing::get(friends::sent_requests),
        )
        .route(
            "/api/friends/requests/{id}/accept",
            axum::routing::put(friends::accept_request),
        )
        .route(
            "/api/friends/requests/{id}/reject",
            axum::routing::put(friends::reject_request),
        );

    // Authenticated routes (JWT required, Claims extractor validates token).
    // /api/messages/search is a static segment and wins over /api/messages/{id}.
    let message_routes = Router::new()
        .route("/api/messages", axum::routing::post(messages::send_message))
        .route(
            "/api/messages/search",
            axum::routing::get(messages::search_messages),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::get(messages::get_messages).delete(messages::delete_message),
        )
        .route(
            "/api/messages/{id}/unread",
            axum::routing::get(messages::unread_count),
        )
        .route(
            "/api/messages/{id}/read",
            axum::routing::put(messages::mark_read),
        )
        .route(
            "/api/conversations",
            axum::routing::get(conversations::list_conversations),
        )
        .route("/api/online", axum::routing::get(presence::online_users));

    // WebSocket endpoint (credential checked before upgrade)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(public_routes)
        .merge(account_routes)
        .merge(friend_routes)
        .merge(message_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
