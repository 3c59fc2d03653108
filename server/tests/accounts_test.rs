//! Integration tests for signup, login sessions and profile endpoints.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use parley_server::config::HubConfig;
use parley_server::state::AppState;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
}

/// Helper: start the server on a random port.
async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = parley_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = parley_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState::new(db, jwt_secret, HubConfig::default());
    let app = parley_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    async fn signup(&self, name: &str, email: &str, password: &str) -> reqwest::Response {
        self.post(
            "/api/auth/signup",
            json!({"name": name, "email": email, "password": password}),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post("/api/auth/login", json!({"email": email, "password": password}))
            .await
    }

    async fn get_authed(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

fn set_cookies(resp: &reqwest::Response) -> Vec<String> {
    resp.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_signup_issues_session() {
    let server = start_test_server().await;

    let resp = server.signup("Ann Lee", "  Ann@Example.com ", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let cookies = set_cookies(&resp);
    assert!(cookies.iter().any(|c| c.starts_with("access_token=") && c.contains("HttpOnly")));
    assert!(cookies.iter().any(|c| c.starts_with("refresh_token=") && c.contains("Path=/api/auth")));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user"]["email"], "ann@example.com");
    assert_eq!(body["user"]["name"], "Ann Lee");
    assert_eq!(body["expires_in"], 900);
    assert!(body["user"].get("password_hash").is_none());

    let token = body["access_token"].as_str().unwrap();
    let me = server.get_authed(token, "/api/auth/me").await;
    assert_eq!(me.status(), StatusCode::OK);
    let me: Value = me.json().await.unwrap();
    assert_eq!(me["user"]["id"], body["user"]["id"]);
}

#[tokio::test]
async fn test_signup_validation_and_duplicates() {
    let server = start_test_server().await;

    let resp = server.signup("A", "a@example.com", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = server.signup("Ann", "not-an-email", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = server.signup("Ann", "ann@example.com", "short").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server.signup("Ann", "ann@example.com", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = server.signup("Other Ann", "ANN@example.com", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = server
        .post("/api/auth/check-email", json!({"email": "Ann@Example.com"}))
        .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["exists"], true);
    assert_eq!(body["email"], "ann@example.com");

    let resp = server
        .post("/api/auth/check-email", json!({"email": "bob@example.com"}))
        .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["exists"], false);
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let server = start_test_server().await;
    server.signup("Ann", "ann@example.com", "hunter22!").await;

    let resp = server.login("ann@example.com", "wrong-password").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = server.login("nobody@example.com", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server.login("ANN@example.com", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Logged in successfully");
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let server = start_test_server().await;
    let body: Value = server
        .signup("Ann", "ann@example.com", "hunter22!")
        .await
        .json()
        .await
        .unwrap();
    let first = body["refresh_token"].as_str().unwrap().to_string();

    let resp = server
        .post("/api/auth/refresh", json!({"refresh_token": first}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated: Value = resp.json().await.unwrap();
    let second = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    // The consumed token is no longer valid
    let resp = server
        .post("/api/auth/refresh", json!({"refresh_token": first}))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Cookie-only refresh works too
    let resp = server
        .client
        .post(server.url("/api/auth/refresh"))
        .header(reqwest::header::COOKIE, format!("refresh_token={second}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server.client.post(server.url("/api/auth/refresh")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let server = start_test_server().await;
    let body: Value = server
        .signup("Ann", "ann@example.com", "hunter22!")
        .await
        .json()
        .await
        .unwrap();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let resp = server
        .post("/api/auth/logout", json!({"refresh_token": refresh}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookies(&resp).iter().all(|c| c.contains("Max-Age=0")));

    let resp = server
        .post("/api/auth/refresh", json!({"refresh_token": refresh}))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_signs_out_sessions() {
    let server = start_test_server().await;
    let body: Value = server
        .signup("Ann", "ann@example.com", "hunter22!")
        .await
        .json()
        .await
        .unwrap();
    let token = body["access_token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let change = |current: &str, new: &str| {
        server
            .client
            .put(server.url("/api/auth/password"))
            .bearer_auth(&token)
            .json(&json!({"current_password": current, "new_password": new}))
            .send()
    };

    let resp = change("wrong-password", "new-password-1").await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = change("hunter22!", "short").await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = change("hunter22!", "new-password-1").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .post("/api/auth/refresh", json!({"refresh_token": refresh}))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server.login("ann@example.com", "hunter22!").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = server.login("ann@example.com", "new-password-1").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validate_requires_token() {
    let server = start_test_server().await;
    let body: Value = server
        .signup("Ann", "ann@example.com", "hunter22!")
        .await
        .json()
        .await
        .unwrap();
    let token = body["access_token"].as_str().unwrap();

    let resp = server.get_authed(token, "/api/auth/validate").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let valid: Value = resp.json().await.unwrap();
    assert_eq!(valid["valid"], true);
    assert_eq!(valid["user_id"], body["user"]["id"]);

    let resp = server.get_authed("garbage", "/api/auth/validate").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // The access_token cookie is accepted in place of a bearer header
    let resp = server
        .client
        .get(server.url("/api/auth/me"))
        .header(reqwest::header::COOKIE, format!("access_token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_profile_update_and_user_search() {
    let server = start_test_server().await;
    let ann: Value = server
        .signup("Ann", "ann@example.com", "hunter22!")
        .await
        .json()
        .await
        .unwrap();
    server.signup("Annabel", "annabel@example.com", "hunter22!").await;
    server.signup("Bob", "bob@example.com", "hunter22!").await;
    let token = ann["access_token"].as_str().unwrap().to_string();

    let update = |body: Value| {
        server
            .client
            .put(server.url("/api/users/me"))
            .bearer_auth(&token)
            .json(&body)
            .send()
    };

    let resp = update(json!({"email": "bob@example.com"})).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let resp = update(json!({"name": "x"})).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = update(json!({"name": "Ann Lee"})).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["user"]["name"], "Ann Lee");
    assert_eq!(updated["user"]["email"], "ann@example.com");

    let resp = server.get_authed(&token, "/api/users/search?q=ann").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let found: Value = resp.json().await.unwrap();
    assert_eq!(found["count"], 1);
    assert_eq!(found["users"][0]["name"], "Annabel");
    assert_eq!(found["query"], "ann");

    let resp = server.get_authed(&token, "/api/users/search?q=%20").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
