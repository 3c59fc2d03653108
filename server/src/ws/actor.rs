//! Per-socket session: a write duty and a read duty sharing one lifecycle.
//!
//! A session registers with the hub, opens, and runs both duties until one
//! ends. Teardown unregisters exactly once, whether it is triggered by a
//! duty or by the session future being dropped.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant};

use crate::config::HubConfig;
use crate::state::AppState;
use crate::ws::dispatch::Dispatcher;
use crate::ws::hub::ConnectionHub;
use crate::ws::protocol::{self, UserId};
use crate::ws::registry::{ConnectionId, OutboundReceiver};

/// Lifecycle of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Shared state machine for a session's two duties.
///
/// Whichever duty fails first wins [`SessionLifecycle::begin_close`]; every
/// later caller gets `false`, so teardown side effects run once.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: AtomicU8,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting -> Open`. Fails if teardown already started.
    pub fn open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closing`. Returns true for exactly one caller.
    pub fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < SessionState::Closing as u8).then_some(SessionState::Closing as u8)
            })
            .is_ok()
    }

    pub fn finish_close(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }
}

/// Issues the single unregister for a session, on first teardown or on drop.
struct SessionGuard {
    hub: Arc<dyn ConnectionHub>,
    user_id: UserId,
    connection_id: ConnectionId,
    lifecycle: Arc<SessionLifecycle>,
}

impl SessionGuard {
    fn new(hub: Arc<dyn ConnectionHub>, user_id: UserId, connection_id: ConnectionId) -> Self {
        Self {
            hub,
            user_id,
            connection_id,
            lifecycle: Arc::new(SessionLifecycle::new()),
        }
    }

    /// Mark the session open. False when teardown has already begun, in
    /// which case the session must not start its duties.
    fn open(&self) -> bool {
        let opened = self.lifecycle.open();
        if !opened {
            tracing::debug!(
                user_id = %self.user_id,
                connection_id = self.connection_id,
                state = ?self.lifecycle.state(),
                "Session closed before it opened"
            );
        }
        opened
    }

    fn teardown(&self, reason: &'static str) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(
            user_id = %self.user_id,
            connection_id = self.connection_id,
            reason,
            "Session closing"
        );
        if let Err(e) = self.hub.unregister(self.user_id, self.connection_id) {
            tracing::warn!(user_id = %self.user_id, error = %e, "Unregister failed");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.teardown("dropped");
        self.lifecycle.finish_close();
    }
}

/// Liveness and write limits for one session.
#[derive(Debug, Clone, Copy)]
struct Timings {
    ping_interval: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl From<&HubConfig> for Timings {
    fn from(config: &HubConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// Run an authenticated socket until either duty ends.
///
/// The write duty drains the outbound queue and sends pings; the read duty
/// decodes intents and hands them to dispatch. Both converge on one
/// teardown that unregisters the connection from the hub.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let registration = match state.hub.register(user_id) {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Hub unavailable, dropping socket");
            return;
        }
    };
    let connection_id = registration.connection_id;
    let timings = Timings::from(&state.hub_config);

    let guard = SessionGuard::new(state.hub.clone(), user_id, connection_id);
    let lifecycle = guard.lifecycle.clone();
    if !guard.open() {
        return;
    }

    tracing::info!(user_id = %user_id, connection_id, "Session opened");

    let (ws_sender, ws_receiver) = socket.split();
    let mut writer_handle = tokio::spawn(write_duty(ws_sender, registration.outbound, timings));

    tokio::select! {
        _ = read_duty(ws_receiver, &state.dispatcher, user_id, timings.read_timeout) => {
            guard.teardown("read duty ended");
            // Unregistering closes the queue; the writer flushes it and sends Close.
            if timeout(timings.write_timeout, &mut writer_handle).await.is_err() {
                writer_handle.abort();
            }
        }
        _ = &mut writer_handle => {
            guard.teardown("write duty ended");
        }
    }

    drop(guard);
    tracing::info!(
        user_id = %user_id,
        connection_id,
        state = ?lifecycle.state(),
        "Session closed"
    );
}

/// Drain the outbound queue in order and keep the peer alive with pings.
/// Ends on a write error, a write timeout, or when the queue is closed.
async fn write_duty(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    timings: Timings,
) {
    let mut ping_timer = interval_at(Instant::now() + timings.ping_interval, timings.ping_interval);

    loop {
        let frame = tokio::select! {
            event = outbound.recv() => match event {
                Some(event) => match protocol::encode_event(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::warn!(event = event.tag(), error = %e, "Failed to encode event");
                        continue;
                    }
                },
                None => {
                    // Queue closed: unregistered, superseded or evicted.
                    let close = Message::Close(Some(CloseFrame {
                        code: 1000,
                        reason: "".into(),
                    }));
                    let _ = timeout(timings.write_timeout, ws_sender.send(close)).await;
                    return;
                }
            },
            _ = ping_timer.tick() => Message::Ping(Vec::new().into()),
        };

        match timeout(timings.write_timeout, ws_sender.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket write failed");
                return;
            }
            Err(_) => {
                tracing::warn!("WebSocket write timed out");
                return;
            }
        }
    }
}

/// Decode inbound frames until the transport fails, closes, or goes quiet
/// past the read deadline. Malformed frames are skipped.
async fn read_duty(
    mut ws_receiver: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    user_id: UserId,
    read_timeout: Duration,
) {
    loop {
        let msg = match timeout(read_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                return;
            }
            Ok(None) => {
                tracing::debug!(user_id = %user_id, "WebSocket stream ended");
                return;
            }
            Err(_) => {
                tracing::warn!(user_id = %user_id, "Read deadline exceeded");
                return;
            }
        };

        match msg {
            Message::Text(text) => handle_frame(dispatcher, user_id, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(dispatcher, user_id, text).await,
                Err(_) => {
                    tracing::debug!(user_id = %user_id, len = data.len(), "Dropped non-UTF-8 binary frame");
                }
            },
            // Any frame resets the read deadline; pings are answered by the transport.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(frame) => {
                tracing::debug!(user_id = %user_id, reason = ?frame, "Client initiated close");
                return;
            }
        }
    }
}

async fn handle_frame(dispatcher: &Dispatcher, user_id: UserId, text: &str) {
    match protocol::decode_intent(text) {
        Ok(intent) => dispatcher.handle_intent(user_id, intent).await,
        Err(e) => {
            tracing::debug!(
                user_id = %user_id,
                error = %e,
                "Dropped malformed frame: {}",
                text.chars().take(100).collect::<String>()
            );
        }
    }
}
