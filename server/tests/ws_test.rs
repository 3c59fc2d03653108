//! Integration tests for the WebSocket upgrade, liveness, and real-time dispatch.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley_server::config::HubConfig;
use parley_server::db::models::User;
use parley_server::db::{AccountStore, SqliteStore};
use parley_server::state::AppState;
use parley_server::ws::ConnectionHub;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

struct TestServer {
    addr: SocketAddr,
    base_url: String,
    state: AppState,
    store: SqliteStore,
}

/// Helper: start the server on a random port.
async fn start_test_server_with(hub_config: HubConfig) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = parley_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = parley_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState::new(db.clone(), jwt_secret, hub_config);
    let app = parley_server::routes::build_router(state.clone());
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
        addr,
        base_url: format!("http://{}", addr),
        state,
        store: SqliteStore::new(db),
    }
}

async fn start_test_server() -> TestServer {
    start_test_server_with(HubConfig::default()).await
}

/// Create a user directly in the store and return it with an access token.
async fn create_user(server: &TestServer, name: &str) -> (User, String) {
    let email = format!("{}@example.com", name.to_lowercase());
    let user = server.store.create_user(name, &email, "").await.unwrap();
    let token = parley_server::auth::jwt::issue_access_token(&server.state.jwt_secret, &user).unwrap();
    (user, token)
}

async fn connect(server: &TestServer, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", server.addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket connection should succeed");
    ws_stream.split()
}

/// Wait until the hub reports `user_id` online.
async fn wait_online(server: &TestServer, user_id: i64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if server.state.hub.is_online(user_id).await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user should come online");
}

async fn wait_offline(server: &TestServer, user_id: i64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !server.state.hub.is_online(user_id).await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user should go offline");
}

/// Next JSON event of type `kind`, skipping control frames and other events.
async fn expect_event(read: &mut WsRead, kind: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let msg = tokio::time::timeout_at(deadline, read.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    }
}

/// Assert no event of type `kind` arrives within `wait`.
async fn assert_no_event(read: &mut WsRead, kind: &str, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    while let Ok(Some(Ok(msg))) = tokio::time::timeout_at(deadline, read.next()).await {
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_ne!(value["type"], kind, "unexpected event: {value}");
        }
    }
}

async fn send_json(write: &mut WsWrite, value: Value) {
    write
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// True if the server closes the stream within two seconds.
async fn closed_by_server(read: &mut WsRead) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

#[tokio::test]
async fn test_ws_connection_with_valid_token() {
    let server = start_test_server().await;
    let (alice, token) = create_user(&server, "Alice").await;

    let (_write, _read) = connect(&server, &token).await;
    wait_online(&server, alice.id).await;

    assert_eq!(server.state.hub.online_users().await.unwrap(), vec![alice.id]);
}

#[tokio::test]
async fn test_ws_connection_with_bearer_header() {
    let server = start_test_server().await;
    let (alice, token) = create_user(&server, "Alice").await;

    let mut request = format!("ws://{}/ws", server.addr).into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    let (_ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("Bearer header should authenticate the upgrade");

    wait_online(&server, alice.id).await;
}

#[tokio::test]
async fn test_ws_rejects_missing_and_invalid_token() {
    let server = start_test_server().await;

    for url in [
        format!("ws://{}/ws", server.addr),
        format!("ws://{}/ws?token=invalid-jwt-token", server.addr),
    ] {
        match tokio_tungstenite::connect_async(&url).await {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 401),
            Err(e) => panic!("expected HTTP 401, got {e}"),
            Ok(_) => panic!("upgrade should be rejected for {url}"),
        }
    }

    assert!(server.state.hub.online_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ws_send_message_reaches_receiver_and_acks_sender() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, bob_token) = create_user(&server, "Bob").await;

    let (mut alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;
    let (_bob_write, mut bob_read) = connect(&server, &bob_token).await;
    wait_online(&server, bob.id).await;

    send_json(
        &mut alice_write,
        json!({"type": "send_message", "payload": {"receiver_id": bob.id, "content": "hi bob"}}),
    )
    .await;

    let ack = expect_event(&mut alice_read, "message_sent").await;
    let pushed = expect_event(&mut bob_read, "new_message").await;

    assert_eq!(ack["payload"], pushed["payload"]);
    let payload = &pushed["payload"];
    assert_eq!(payload["sender_id"], alice.id);
    assert_eq!(payload["receiver_id"], bob.id);
    assert_eq!(payload["content"], "hi bob");
    assert_eq!(payload["message_type"], "text");
    assert_eq!(payload["is_delivered"], true);
    assert_eq!(payload["sender_name"], "Alice");
    assert_eq!(payload["sender_username"], "alice@example.com");

    // Persisted state matches what was pushed
    let history: Value = reqwest::Client::new()
        .get(format!("{}/api/messages/{}", server.base_url, bob.id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let stored = &history[0];
    assert_eq!(stored["id"], payload["message_id"]);
    assert_eq!(stored["content"], payload["content"]);

    let parse = |v: &Value| v.as_str().unwrap().parse::<chrono::DateTime<chrono::Utc>>().unwrap();
    assert_eq!(parse(&stored["created_at"]), parse(&payload["timestamp"]));
    assert_eq!(parse(&stored["updated_at"]), parse(&payload["updated_at"]));
}

#[tokio::test]
async fn test_ws_send_to_offline_receiver_still_acks() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, _) = create_user(&server, "Bob").await;

    let (mut alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;

    send_json(
        &mut alice_write,
        json!({"type": "send_message", "payload": {"receiver_id": bob.id, "content": "later", "message_type": "note"}}),
    )
    .await;

    let ack = expect_event(&mut alice_read, "message_sent").await;
    assert_eq!(ack["payload"]["is_delivered"], false);
    assert_eq!(ack["payload"]["message_type"], "note");
}

#[tokio::test]
async fn test_ws_invalid_send_reports_error_and_malformed_frames_are_ignored() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;

    let (mut alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;

    // None of these produce an event
    alice_write.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut alice_write, json!({"type": "dance", "payload": {}})).await;
    send_json(&mut alice_write, json!({"type": "typing", "payload": {"receiver_id": "x"}})).await;
    alice_write
        .send(Message::Binary(vec![0xff, 0xfe, 0x00].into()))
        .await
        .unwrap();

    send_json(
        &mut alice_write,
        json!({"type": "send_message", "payload": {"receiver_id": alice.id, "content": "me"}}),
    )
    .await;

    // The first error seen is the self-send rejection
    let error = expect_event(&mut alice_read, "error").await;
    assert_eq!(error["payload"]["message"], "Cannot send message to yourself");

    send_json(
        &mut alice_write,
        json!({"type": "send_message", "payload": {"receiver_id": 9999, "content": "nobody"}}),
    )
    .await;
    let error = expect_event(&mut alice_read, "error").await;
    assert_eq!(error["payload"]["message"], "receiver not found");

    // Connection survived all of it
    assert!(server.state.hub.is_online(alice.id).await.unwrap());
}

#[tokio::test]
async fn test_ws_binary_json_frame_is_accepted() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, bob_token) = create_user(&server, "Bob").await;

    let (mut alice_write, _alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;
    let (_bob_write, mut bob_read) = connect(&server, &bob_token).await;
    wait_online(&server, bob.id).await;

    let frame = json!({"type": "typing", "payload": {"receiver_id": bob.id}}).to_string();
    alice_write
        .send(Message::Binary(frame.into_bytes().into()))
        .await
        .unwrap();

    let typing = expect_event(&mut bob_read, "typing").await;
    assert_eq!(typing["payload"]["sender_id"], alice.id);
}

#[tokio::test]
async fn test_ws_typing_is_relayed_to_receiver_only() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, bob_token) = create_user(&server, "Bob").await;
    let (carol, carol_token) = create_user(&server, "Carol").await;

    let (mut alice_write, _alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;
    let (_bob_write, mut bob_read) = connect(&server, &bob_token).await;
    wait_online(&server, bob.id).await;
    let (_carol_write, mut carol_read) = connect(&server, &carol_token).await;
    wait_online(&server, carol.id).await;

    send_json(&mut alice_write, json!({"type": "typing", "payload": {"receiver_id": bob.id}})).await;
    send_json(&mut alice_write, json!({"type": "stop_typing", "payload": {"receiver_id": bob.id}})).await;

    let typing = expect_event(&mut bob_read, "typing").await;
    assert_eq!(typing["payload"], json!({"sender_id": alice.id, "receiver_id": bob.id}));
    let stop = expect_event(&mut bob_read, "stop_typing").await;
    assert_eq!(stop["payload"], json!({"sender_id": alice.id, "receiver_id": bob.id}));

    assert_no_event(&mut carol_read, "typing", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_ws_mark_read_notifies_original_sender() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, bob_token) = create_user(&server, "Bob").await;

    let (mut alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;
    let (mut bob_write, mut bob_read) = connect(&server, &bob_token).await;
    wait_online(&server, bob.id).await;

    send_json(
        &mut alice_write,
        json!({"type": "send_message", "payload": {"receiver_id": bob.id, "content": "read me"}}),
    )
    .await;
    expect_event(&mut bob_read, "new_message").await;

    send_json(&mut bob_write, json!({"type": "mark_read", "payload": {"sender_id": alice.id}})).await;

    let receipt = expect_event(&mut alice_read, "message_read").await;
    assert_eq!(receipt["payload"], json!({"sender_id": alice.id, "receiver_id": bob.id}));

    let unread: Value = reqwest::Client::new()
        .get(format!("{}/api/messages/{}/unread", server.base_url, alice.id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unread["unread_count"], 0);
}

#[tokio::test]
async fn test_ws_rest_send_pushes_to_both_sockets() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, bob_token) = create_user(&server, "Bob").await;

    let (_alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;
    let (_bob_write, mut bob_read) = connect(&server, &bob_token).await;
    wait_online(&server, bob.id).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages", server.base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"receiver_id": bob.id, "content": "via rest"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();

    let pushed = expect_event(&mut bob_read, "new_message").await;
    assert_eq!(pushed["payload"]["message_id"], body["id"]);
    let ack = expect_event(&mut alice_read, "message_sent").await;
    assert_eq!(ack["payload"]["message_id"], body["id"]);
}

#[tokio::test]
async fn test_ws_presence_online_and_offline() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, bob_token) = create_user(&server, "Bob").await;

    let (_alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;
    let (mut bob_write, mut bob_read) = connect(&server, &bob_token).await;

    let online = expect_event(&mut alice_read, "user_online").await;
    assert_eq!(online["payload"]["user_id"], bob.id);

    // No echo of a user's own presence
    assert_no_event(&mut bob_read, "user_online", Duration::from_millis(300)).await;

    bob_write.send(Message::Close(None)).await.unwrap();

    let offline = expect_event(&mut alice_read, "user_offline").await;
    assert_eq!(offline["payload"]["user_id"], bob.id);
    wait_offline(&server, bob.id).await;
}

#[tokio::test]
async fn test_ws_second_connection_supersedes_first() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, bob_token) = create_user(&server, "Bob").await;

    let (_bob_write, mut bob_read) = connect(&server, &bob_token).await;
    wait_online(&server, bob.id).await;

    let (_first_write, mut first_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;
    expect_event(&mut bob_read, "user_online").await;

    let (_second_write, mut second_read) = connect(&server, &alice_token).await;
    assert!(closed_by_server(&mut first_read).await, "superseded socket should be closed");

    // The superseded teardown must not take the new connection offline
    assert_no_event(&mut bob_read, "user_offline", Duration::from_millis(300)).await;
    assert_eq!(
        server.state.hub.online_users().await.unwrap(),
        vec![alice.id, bob.id]
    );

    server
        .state
        .hub
        .dispatch(alice.id, parley_server::ws::ServerEvent::error("ping"))
        .unwrap();
    let event = expect_event(&mut second_read, "error").await;
    assert_eq!(event["payload"]["message"], "ping");
}

#[tokio::test]
async fn test_ws_oversized_frame_closes_connection() {
    let server = start_test_server().await;
    let (alice, alice_token) = create_user(&server, "Alice").await;
    let (bob, _) = create_user(&server, "Bob").await;

    let (mut alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;

    let content = "x".repeat(2048);
    let _ = alice_write
        .send(Message::Text(
            json!({"type": "send_message", "payload": {"receiver_id": bob.id, "content": content}})
                .to_string()
                .into(),
        ))
        .await;

    assert!(closed_by_server(&mut alice_read).await);
    wait_offline(&server, alice.id).await;
}

#[tokio::test]
async fn test_ws_server_sends_pings() {
    let server = start_test_server_with(HubConfig {
        ping_interval_secs: 1,
        read_timeout_secs: 3,
        ..HubConfig::default()
    })
    .await;
    let (alice, alice_token) = create_user(&server, "Alice").await;

    let (_alice_write, mut alice_read) = connect(&server, &alice_token).await;
    wait_online(&server, alice.id).await;

    let got_ping = tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(Ok(msg)) = alice_read.next().await {
            if matches!(msg, Message::Ping(_)) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(got_ping, "server should ping idle connections");

    // Pongs are sent automatically by the client, so the session outlives the read deadline
    let keep_reading = tokio::spawn(async move {
        while let Some(Ok(_)) = alice_read.next().await {}
    });
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(server.state.hub.is_online(alice.id).await.unwrap());
    keep_reading.abort();
}
