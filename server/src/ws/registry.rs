//! Online-user map owned by the hub loop.
//!
//! One entry per user: registering again replaces the previous connection
//! and hands it back to the caller, so dropping it closes the superseded
//! outbound queue.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use super::protocol::{ServerEvent, UserId};

/// Unique id of one accepted socket, used to tell a live entry from a
/// superseded one.
pub type ConnectionId = u64;

/// Sending half of a connection's bounded outbound queue.
/// The registry holds the only sender, so removing the entry closes the queue.
pub type OutboundSender = mpsc::Sender<Arc<ServerEvent>>;

/// Receiving half, drained by the session's write duty.
pub type OutboundReceiver = mpsc::Receiver<Arc<ServerEvent>>;

#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    queue: OutboundSender,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, queue: OutboundSender) -> Self {
        Self { id, queue }
    }

    /// Non-blocking enqueue.
    pub fn try_enqueue(&self, event: Arc<ServerEvent>) -> Result<(), TrySendError<Arc<ServerEvent>>> {
        self.queue.try_send(event)
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `connection` for `user_id`, returning the connection it evicted.
    pub fn register(&mut self, user_id: UserId, connection: ConnectionHandle) -> Option<ConnectionHandle> {
        self.entries.insert(user_id, connection)
    }

    /// Remove the entry only if it is still `connection_id`.
    pub fn unregister(&mut self, user_id: UserId, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        match self.entries.get(&user_id) {
            Some(current) if current.id == connection_id => self.entries.remove(&user_id),
            _ => None,
        }
    }

    /// Remove whatever connection is registered for `user_id`.
    pub fn remove(&mut self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries.remove(&user_id)
    }

    pub fn lookup(&self, user_id: UserId) -> Option<&ConnectionHandle> {
        self.entries.get(&user_id)
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.entries.contains_key(&user_id)
    }

    /// Online users, sorted.
    pub fn list(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
