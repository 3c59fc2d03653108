use std::sync::Arc;

use crate::auth::{IdentityVerifier, JwtVerifier};
use crate::config::HubConfig;
use crate::db::{AccountStore, ChatStore, DbPool, SqliteStore};
use crate::friends::FriendGraph;
use crate::ws::{ConnectionHub, Dispatcher, HubHandle};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Persistence seam used by dispatch and the message handlers
    pub store: Arc<dyn ChatStore>,
    /// Credentials, profiles and refresh tokens
    pub accounts: Arc<dyn AccountStore>,
    pub friends: FriendGraph,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Resolves the upgrade request's credential to a user
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Handle to the hub event loop
    pub hub: Arc<dyn ConnectionHub>,
    pub dispatcher: Dispatcher,
    pub hub_config: HubConfig,
}

impl AppState {
    /// Wire the sqlite store, JWT verifier and a freshly spawned hub loop.
    /// Must be called inside a tokio runtime.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, hub_config: HubConfig) -> Self {
        let sqlite = Arc::new(SqliteStore::new(db));
        let store: Arc<dyn ChatStore> = sqlite.clone();
        let accounts: Arc<dyn AccountStore> = sqlite.clone();
        let friends = FriendGraph::new(sqlite, store.clone());
        let hub: Arc<dyn ConnectionHub> =
            Arc::new(HubHandle::spawn(hub_config.outbound_queue_capacity));
        let verifier: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(jwt_secret.clone()));
        let dispatcher = Dispatcher::new(store.clone(), hub.clone());

        Self {
            store,
            accounts,
            friends,
            jwt_secret,
            verifier,
            hub,
            dispatcher,
            hub_config,
        }
    }
}
