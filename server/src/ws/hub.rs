//! Hub event loop: the single writer of the connection registry.
//!
//! Sessions and dispatch talk to the loop through [`HubHandle`], which only
//! ever enqueues a [`HubCommand`]. Commands are applied one at a time in
//! arrival order, so "who is online" is linearizable without a lock held
//! across I/O. The loop never awaits anything but its own inbox: delivery to
//! a connection is a non-blocking `try_send`, and a full queue evicts that
//! connection instead of stalling everyone else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{PresencePayload, ServerEvent, UserId};
use super::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, OutboundReceiver};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub event loop is not running")]
    Closed,
}

/// Requests processed by the hub loop.
#[derive(Debug)]
pub enum HubCommand {
    Register {
        user_id: UserId,
        connection: ConnectionHandle,
    },
    Unregister {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    Dispatch {
        target: UserId,
        event: Arc<ServerEvent>,
    },
    Broadcast {
        event: Arc<ServerEvent>,
        except: Option<UserId>,
    },
    Disconnect {
        user_id: UserId,
    },
    IsOnline {
        user_id: UserId,
        resp: oneshot::Sender<bool>,
    },
    OnlineUsers {
        resp: oneshot::Sender<Vec<UserId>>,
    },
}

/// A freshly registered connection: its id and the queue its write duty drains.
#[derive(Debug)]
pub struct Registration {
    pub connection_id: ConnectionId,
    pub outbound: OutboundReceiver,
}

/// Capability set of the real-time hub.
#[async_trait]
pub trait ConnectionHub: Send + Sync {
    /// Register a new connection for `user_id`, superseding any previous one.
    fn register(&self, user_id: UserId) -> Result<Registration, HubError>;

    /// Remove `connection_id` if it is still the live entry for `user_id`.
    fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> Result<(), HubError>;

    /// Best-effort push to one user; dropped when they are offline.
    fn dispatch(&self, target: UserId, event: ServerEvent) -> Result<(), HubError>;

    /// Push to every online user except `except`.
    fn broadcast(&self, event: ServerEvent, except: Option<UserId>) -> Result<(), HubError>;

    /// Force-close a user's connection.
    fn disconnect(&self, user_id: UserId) -> Result<(), HubError>;

    async fn is_online(&self, user_id: UserId) -> Result<bool, HubError>;

    async fn online_users(&self) -> Result<Vec<UserId>, HubError>;
}

/// Cheaply cloneable handle to the running hub loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    /// Unbounded: register and unregister (the latter from `Drop`) must never
    /// block or fail on a busy loop, and each command costs the loop only
    /// non-blocking `try_send`s, so the backlog drains at memory speed.
    /// Per-connection memory is bounded by the outbound queues instead.
    tx: mpsc::UnboundedSender<HubCommand>,
    queue_capacity: usize,
    next_connection_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Spawn the hub loop on the current runtime.
    /// `queue_capacity` bounds every connection's outbound queue.
    pub fn spawn(queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            registry: ConnectionRegistry::new(),
            departed: Vec::new(),
            rx,
        };
        tokio::spawn(hub.run());

        Self {
            tx,
            queue_capacity: queue_capacity.max(1),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).map_err(|_| HubError::Closed)
    }
}

#[async_trait]
impl ConnectionHub for HubHandle {
    fn register(&self, user_id: UserId) -> Result<Registration, HubError> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (queue, outbound) = mpsc::channel(self.queue_capacity);
        self.send(HubCommand::Register {
            user_id,
            connection: ConnectionHandle::new(connection_id, queue),
        })?;
        Ok(Registration {
            connection_id,
            outbound,
        })
    }

    fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister {
            user_id,
            connection_id,
        })
    }

    fn dispatch(&self, target: UserId, event: ServerEvent) -> Result<(), HubError> {
        self.send(HubCommand::Dispatch {
            target,
            event: Arc::new(event),
        })
    }

    fn broadcast(&self, event: ServerEvent, except: Option<UserId>) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            event: Arc::new(event),
            except,
        })
    }

    fn disconnect(&self, user_id: UserId) -> Result<(), HubError> {
        self.send(HubCommand::Disconnect { user_id })
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, HubError> {
        let (resp, rx) = oneshot::channel();
        self.send(HubCommand::IsOnline { user_id, resp })?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn online_users(&self) -> Result<Vec<UserId>, HubError> {
        let (resp, rx) = oneshot::channel();
        self.send(HubCommand::OnlineUsers { resp })?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

/// Loop state. Lives inside the spawned task only.
struct Hub {
    registry: ConnectionRegistry,
    /// Users evicted while handling the current command, still to be announced offline.
    departed: Vec<UserId>,
    rx: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    async fn run(mut self) {
        tracing::debug!("Hub event loop started");
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
            self.announce_departures();
        }
        tracing::debug!(
            remaining = self.registry.len(),
            "Hub event loop stopped"
        );
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                user_id,
                connection,
            } => self.on_register(user_id, connection),
            HubCommand::Unregister {
                user_id,
                connection_id,
            } => self.on_unregister(user_id, connection_id),
            HubCommand::Dispatch { target, event } => {
                if !self.deliver(target, &event) {
                    tracing::debug!(
                        target_user = %target,
                        event = event.tag(),
                        "Event dropped, target offline"
                    );
                }
            }
            HubCommand::Broadcast { event, except } => self.fan_out(&event, except),
            HubCommand::Disconnect { user_id } => {
                if self.registry.remove(user_id).is_some() {
                    tracing::info!(user_id = %user_id, "Connection force-closed");
                    self.departed.push(user_id);
                }
            }
            HubCommand::IsOnline { user_id, resp } => {
                let _ = resp.send(self.registry.contains(user_id));
            }
            HubCommand::OnlineUsers { resp } => {
                let _ = resp.send(self.registry.list());
            }
        }
    }

    fn on_register(&mut self, user_id: UserId, connection: ConnectionHandle) {
        let connection_id = connection.id;
        if let Some(previous) = self.registry.register(user_id, connection) {
            // Dropping the old handle closes its queue; its write duty then shuts down.
            tracing::info!(
                user_id = %user_id,
                superseded = previous.id,
                connection_id,
                "Connection superseded"
            );
        }
        tracing::info!(
            user_id = %user_id,
            connection_id,
            online = self.registry.len(),
            "Connection registered"
        );

        let online = Arc::new(ServerEvent::UserOnline(PresencePayload { user_id }));
        self.fan_out(&online, Some(user_id));
    }

    fn on_unregister(&mut self, user_id: UserId, connection_id: ConnectionId) {
        if self.registry.unregister(user_id, connection_id).is_some() {
            tracing::info!(
                user_id = %user_id,
                connection_id,
                online = self.registry.len(),
                "Connection unregistered"
            );
            self.departed.push(user_id);
        } else {
            tracing::debug!(
                user_id = %user_id,
                connection_id,
                "Stale unregister ignored"
            );
        }
    }

    /// Try to enqueue `event` for `target`. Returns whether it was queued.
    fn deliver(&mut self, target: UserId, event: &Arc<ServerEvent>) -> bool {
        let Some(connection) = self.registry.lookup(target) else {
            return false;
        };
        let connection_id = connection.id;

        match connection.try_enqueue(Arc::clone(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    user_id = %target,
                    connection_id,
                    event = event.tag(),
                    "Outbound queue full, disconnecting slow consumer"
                );
                self.evict(target);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    user_id = %target,
                    connection_id,
                    "Outbound queue already closed"
                );
                self.evict(target);
                false
            }
        }
    }

    fn evict(&mut self, user_id: UserId) {
        if self.registry.remove(user_id).is_some() {
            self.departed.push(user_id);
        }
    }

    fn fan_out(&mut self, event: &Arc<ServerEvent>, except: Option<UserId>) {
        for target in self.registry.list() {
            if Some(target) != except {
                self.deliver(target, event);
            }
        }
    }

    /// Announce every departure, including ones caused by announcing.
    fn announce_departures(&mut self) {
        while let Some(user_id) = self.departed.pop() {
            let offline = Arc::new(ServerEvent::UserOffline(PresencePayload { user_id }));
            self.fan_out(&offline, Some(user_id));
        }
    }
}
