//! Message dispatch: turns client intents into persistence effects and events.
//!
//! Persistence happens here, in the calling session's task, never on the hub
//! loop. Events are handed to the hub afterwards, so nothing is pushed for a
//! message whose write failed.

use std::sync::Arc;

use crate::db::models::{Message, NewMessage, DEFAULT_MESSAGE_TYPE};
use crate::db::{ChatStore, StoreError};
use crate::ws::hub::{ConnectionHub, HubError};
use crate::ws::protocol::{
    ClientIntent, MessagePayload, ReadReceipt, SendMessageIntent, ServerEvent, TypingPayload, UserId,
};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Cannot send message to yourself")]
    SelfMessage,

    #[error("content is required")]
    EmptyContent,

    #[error("receiver not found")]
    ReceiverNotFound,

    #[error("sender not found")]
    SenderNotFound,

    #[error("failed to persist message")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hub(#[from] HubError),
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ChatStore>,
    hub: Arc<dyn ConnectionHub>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ChatStore>, hub: Arc<dyn ConnectionHub>) -> Self {
        Self { store, hub }
    }

    /// Route one decoded intent from `user_id`'s socket.
    /// Failures are reported back to the sender as an `error` event.
    pub async fn handle_intent(&self, user_id: UserId, intent: ClientIntent) {
        let result = match intent {
            ClientIntent::SendMessage(intent) => self.send_message(user_id, intent).await.map(|_| ()),
            ClientIntent::Typing(intent) => self.typing(user_id, intent.receiver_id, true),
            ClientIntent::StopTyping(intent) => self.typing(user_id, intent.receiver_id, false),
            ClientIntent::MarkRead(intent) => self.mark_read(user_id, intent.sender_id).await.map(|_| ()),
        };

        if let Err(err) = result {
            self.report(user_id, &err);
        }
    }

    /// Persist a message, push it to the receiver if online, and acknowledge
    /// it to the sender.
    pub async fn send_message(
        &self,
        sender_id: UserId,
        intent: SendMessageIntent,
    ) -> Result<Message, DispatchError> {
        if intent.receiver_id == sender_id {
            return Err(DispatchError::SelfMessage);
        }
        if intent.content.trim().is_empty() {
            return Err(DispatchError::EmptyContent);
        }
        if self.store.get_user_by_id(intent.receiver_id).await?.is_none() {
            return Err(DispatchError::ReceiverNotFound);
        }
        if self.store.get_user_by_id(sender_id).await?.is_none() {
            return Err(DispatchError::SenderNotFound);
        }

        let message_type = intent
            .message_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string());

        let mut message = self
            .store
            .create_message(NewMessage {
                sender_id,
                receiver_id: intent.receiver_id,
                content: intent.content,
                message_type,
            })
            .await?;

        // Delivery marking is opportunistic: only when the receiver is
        // connected right now.
        if self.hub.is_online(message.receiver_id).await? {
            match self.store.mark_message_as_delivered(message.id).await {
                Ok(()) => message.is_delivered = true,
                Err(err) => tracing::warn!(
                    message_id = message.id,
                    error = %err,
                    "Failed to mark message as delivered"
                ),
            }
        }

        let payload = MessagePayload::from(&message);
        self.hub
            .dispatch(message.receiver_id, ServerEvent::NewMessage(payload.clone()))?;
        self.hub.dispatch(sender_id, ServerEvent::Ack(payload))?;

        tracing::debug!(
            message_id = message.id,
            sender_id = %sender_id,
            receiver_id = %message.receiver_id,
            delivered = message.is_delivered,
            "Message dispatched"
        );

        Ok(message)
    }

    /// `reader_id` has read everything `sender_id` sent them; tell `sender_id`.
    pub async fn mark_read(&self, reader_id: UserId, sender_id: UserId) -> Result<usize, DispatchError> {
        let updated = self.store.mark_messages_as_read(sender_id, reader_id).await?;
        self.hub.dispatch(
            sender_id,
            ServerEvent::MessageRead(ReadReceipt {
                sender_id,
                receiver_id: reader_id,
            }),
        )?;
        Ok(updated)
    }

    fn typing(&self, sender_id: UserId, receiver_id: UserId, started: bool) -> Result<(), DispatchError> {
        let payload = TypingPayload {
            sender_id,
            receiver_id,
        };
        let event = if started {
            ServerEvent::Typing(payload)
        } else {
            ServerEvent::StopTyping(payload)
        };
        self.hub.dispatch(receiver_id, event)?;
        Ok(())
    }

    fn report(&self, user_id: UserId, err: &DispatchError) {
        match err {
            DispatchError::Hub(_) => {
                tracing::warn!(user_id = %user_id, error = %err, "Hub unavailable, intent dropped");
                return;
            }
            DispatchError::Store(source) => {
                tracing::warn!(user_id = %user_id, error = %source, "Persistence failure");
            }
            _ => {
                tracing::debug!(user_id = %user_id, error = %err, "Intent rejected");
            }
        }
        let _ = self.hub.dispatch(user_id, ServerEvent::error(err.to_string()));
    }
}
