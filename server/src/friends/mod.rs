//! Friend graph: requests, acceptance, removal and blocking between users.
//!
//! Each unordered pair of users has at most one friendships row. A rejected
//! request may be re-sent, which turns the row back into a pending request
//! from the new sender. Blocking rewrites the row so the blocker becomes the
//! requester.

pub mod routes;
pub mod store;

use std::sync::Arc;

pub use store::FriendStore;

use crate::db::models::{Friendship, FriendshipStatus};
use crate::db::{ChatStore, StoreError};
use crate::ws::protocol::UserId;

#[derive(Debug, thiserror::Error)]
pub enum FriendError {
    #[error("cannot send friend request to yourself")]
    SelfRequest,

    #[error("cannot block yourself")]
    SelfBlock,

    #[error("user not found")]
    UserNotFound,

    #[error("friendship not found")]
    NotFound,

    #[error("users are already friends")]
    AlreadyFriends,

    #[error("friend request already pending")]
    AlreadyPending,

    #[error("cannot send friend request to blocked user")]
    Blocked,

    #[error("friend request is not pending")]
    NotPending,

    #[error("not allowed to modify this friendship")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Friendship rules over the [`FriendStore`] seam.
#[derive(Clone)]
pub struct FriendGraph {
    store: Arc<dyn FriendStore>,
    users: Arc<dyn ChatStore>,
}

impl FriendGraph {
    pub fn new(store: Arc<dyn FriendStore>, users: Arc<dyn ChatStore>) -> Self {
        Self { store, users }
    }

    async fn ensure_user(&self, id: UserId) -> Result<(), FriendError> {
        match self.users.get_user_by_id(id).await? {
            Some(_) => Ok(()),
            None => Err(FriendError::UserNotFound),
        }
    }

    async fn existing(&self, id: i64) -> Result<Friendship, FriendError> {
        self.store.friendship(id).await?.ok_or(FriendError::NotFound)
    }

    async fn update(
        &self,
        id: i64,
        requester: UserId,
        addressee: UserId,
        status: FriendshipStatus,
    ) -> Result<Friendship, FriendError> {
        self.store
            .set_friendship(id, requester, addressee, status)
            .await?
            .ok_or(FriendError::NotFound)
    }

    pub async fn send_request(&self, from: UserId, to: UserId) -> Result<Friendship, FriendError> {
        if from == to {
            return Err(FriendError::SelfRequest);
        }
        self.ensure_user(to).await?;

        let friendship = match self.store.friendship_between(from, to).await? {
            None => {
                self.store
                    .create_friendship(from, to, FriendshipStatus::Pending)
                    .await?
            }
            Some(existing) => match existing.status {
                FriendshipStatus::Accepted => return Err(FriendError::AlreadyFriends),
                FriendshipStatus::Pending => return Err(FriendError::AlreadyPending),
                FriendshipStatus::Blocked => return Err(FriendError::Blocked),
                FriendshipStatus::Rejected => {
                    self.update(existing.id, from, to, FriendshipStatus::Pending)
                        .await?
                }
            },
        };

        tracing::debug!(friendship_id = friendship.id, from = %from, to = %to, "Friend request sent");
        Ok(friendship)
    }

    /// Move a pending request addressed to `user` to `status`.
    async fn answer(
        &self,
        id: i64,
        user: UserId,
        status: FriendshipStatus,
    ) -> Result<Friendship, FriendError> {
        let existing = self.existing(id).await?;
        if existing.addressee_id != user {
            return Err(FriendError::Forbidden);
        }
        if existing.status != FriendshipStatus::Pending {
            return Err(FriendError::NotPending);
        }
        self.update(id, existing.requester_id, existing.addressee_id, status)
            .await
    }

    pub async fn accept(&self, id: i64, user: UserId) -> Result<Friendship, FriendError> {
        self.answer(id, user, FriendshipStatus::Accepted).await
    }

    pub async fn reject(&self, id: i64, user: UserId) -> Result<Friendship, FriendError> {
        self.answer(id, user, FriendshipStatus::Rejected).await
    }

    /// Delete a friendship or request. Only participants may do so, and a
    /// block can only be lifted by the blocker.
    pub async fn remove(&self, id: i64, user: UserId) -> Result<(), FriendError> {
        let existing = self.existing(id).await?;
        if !existing.involves(user) {
            return Err(FriendError::Forbidden);
        }
        if existing.status == FriendshipStatus::Blocked && existing.requester_id != user {
            return Err(FriendError::Forbidden);
        }
        if !self.store.delete_friendship(id).await? {
            return Err(FriendError::NotFound);
        }
        Ok(())
    }

    pub async fn block(&self, blocker: UserId, blocked: UserId) -> Result<Friendship, FriendError> {
        if blocker == blocked {
            return Err(FriendError::SelfBlock);
        }
        self.ensure_user(blocked).await?;

        let friendship = match self.store.friendship_between(blocker, blocked).await? {
            None => {
                self.store
                    .create_friendship(blocker, blocked, FriendshipStatus::Blocked)
                    .await?
            }
            // The other side's block stands; ours is already in place otherwise.
            Some(existing) if existing.status == FriendshipStatus::Blocked => existing,
            Some(existing) => {
                self.update(existing.id, blocker, blocked, FriendshipStatus::Blocked)
                    .await?
            }
        };

        tracing::info!(blocker = %blocker, blocked = %blocked, "User blocked");
        Ok(friendship)
    }

    pub async fn friends(&self, user: UserId) -> Result<Vec<Friendship>, FriendError> {
        Ok(self.store.friends(user).await?)
    }

    pub async fn pending(&self, user: UserId) -> Result<Vec<Friendship>, FriendError> {
        Ok(self.store.pending_for(user).await?)
    }

    pub async fn sent(&self, user: UserId) -> Result<Vec<Friendship>, FriendError> {
        Ok(self.store.sent_by(user).await?)
    }
}
