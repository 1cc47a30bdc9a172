//! The protocol brain: submission, fan-out and status relay.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    delivery::DeliveryTracker,
    error::SyncError,
    model::{Message, NewMessage},
    protocol::{ClientEvent, ServerEvent, StatusUpdate, SubmitRequest},
    registry::{ConnectionId, RoomRegistry},
    store::MessageStore,
};

pub const MAX_BODY_CHARS: usize = 4000;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    store: Arc<dyn MessageStore>,
    registry: RoomRegistry,
    tracker: DeliveryTracker,
    store_timeout: Duration,
}

#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn MessageStore>, registry: RoomRegistry) -> Self {
        Self::with_timeout(store, registry, DEFAULT_STORE_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn MessageStore>, registry: RoomRegistry, store_timeout: Duration) -> Self {
        let tracker = DeliveryTracker::new(store.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                tracker,
                store_timeout,
            }),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.inner.registry
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.inner.tracker
    }

    /// Validates, persists and broadcasts one submission from `user_id`.
    ///
    /// The persist-and-broadcast step runs on its own task: once the
    /// submission is accepted it completes even if the caller goes away or
    /// stops waiting after `store_timeout`.
    pub async fn submit(&self, request: SubmitRequest, user_id: &str) -> Result<Message, SyncError> {
        let new = self.validate(request, user_id).await?;

        let this = self.clone();
        let task = tokio::spawn(async move { this.persist_and_broadcast(new).await });

        match tokio::time::timeout(self.inner.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(SyncError::PersistenceFailure(format!("persist task failed: {err}"))),
            Err(_) => {
                warn!(user = user_id, "store did not answer within {:?}", self.inner.store_timeout);
                Err(SyncError::PersistenceFailure("store timed out".to_owned()))
            }
        }
    }

    async fn validate(&self, request: SubmitRequest, user_id: &str) -> Result<NewMessage, SyncError> {
        let SubmitRequest { room_id, sender_id, body, replied_to_id, local_id } = request;

        let body = body.trim();
        if body.is_empty() {
            return Err(SyncError::invalid("message body is empty"));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(SyncError::invalid(format!("message body exceeds {MAX_BODY_CHARS} characters")));
        }
        if sender_id != user_id {
            return Err(SyncError::invalid("senderId is not the authenticated user"));
        }

        let Some(sender) = self.inner.store.user(&sender_id).await? else {
            return Err(SyncError::invalid(format!("unknown user {sender_id}")));
        };
        if self.inner.store.room(&room_id).await?.is_none() {
            return Err(SyncError::invalid(format!("unknown room {room_id}")));
        }
        if let Some(replied_to_id) = &replied_to_id {
            match self.inner.store.message(replied_to_id).await? {
                Some(original) if original.room_id == room_id => {}
                _ => return Err(SyncError::invalid(format!("unknown message {replied_to_id} in room {room_id}"))),
            }
        }

        Ok(NewMessage {
            local_id,
            room_id,
            sender_id,
            sender_display_name: sender.display_name,
            body: body.to_owned(),
            replied_to_id,
        })
    }

    async fn persist_and_broadcast(&self, new: NewMessage) -> Result<Message, SyncError> {
        let persisted = self.inner.store.persist(new).await?;
        let message = persisted.message;
        let id = message.canonical_id.clone().unwrap_or_default();

        if !persisted.fresh {
            debug!(message = %id, "replayed submission, already broadcast");
            return Ok(message);
        }

        info!(message = %id, room = %message.room_id, sender = %message.sender_id, "message stored");
        self.announce(&message).await;
        Ok(message)
    }

    async fn announce(&self, message: &Message) {
        if !self.inner.tracker.track(message).await {
            debug!(message = ?message.canonical_id, "already announced");
            return;
        }
        let reached = self
            .inner
            .registry
            .broadcast(&message.room_id, ServerEvent::ReceiveMessage { message: message.clone() })
            .await;
        debug!(room = %message.room_id, reached, "message broadcast");
    }

    /// Stored messages of a room, oldest first.
    pub async fn history(&self, room_id: &str) -> Result<Vec<Message>, SyncError> {
        if self.inner.store.room(room_id).await?.is_none() {
            return Err(SyncError::invalid(format!("unknown room {room_id}")));
        }
        self.inner.store.room_messages(room_id).await
    }

    /// Handles one event received on `connection`, authenticated as `user_id`.
    pub async fn handle_event(
        &self,
        connection: ConnectionId,
        user_id: &str,
        event: ClientEvent,
    ) -> Result<(), SyncError> {
        match event {
            ClientEvent::JoinRoom { room_id, user_id: claimed } => {
                check_identity(user_id, &claimed)?;
                if self.inner.store.room(&room_id).await?.is_none() {
                    return Err(SyncError::invalid(format!("unknown room {room_id}")));
                }
                self.inner.registry.join(connection, &room_id).await;
            }
            ClientEvent::LeaveRoom { room_id, user_id: claimed } => {
                check_identity(user_id, &claimed)?;
                self.inner.registry.leave(connection, &room_id).await;
            }
            ClientEvent::SendMessage { message } => {
                self.echo(connection, user_id, message).await?;
            }
            ClientEvent::MarkDelivered { canonical_id, room_id, user_id: claimed } => {
                check_identity(user_id, &claimed)?;
                self.require_member(connection, &room_id).await?;
                let update = self.inner.tracker.mark_delivered(&canonical_id, &room_id, user_id).await?;
                self.push_status(update).await;
            }
            ClientEvent::MarkSeen { canonical_ids, room_id, user_id: claimed } => {
                check_identity(user_id, &claimed)?;
                self.require_member(connection, &room_id).await?;
                let update = self.inner.tracker.mark_seen(&canonical_ids, &room_id, user_id).await?;
                self.push_status(update).await;
            }
        }
        Ok(())
    }

    /// The client-side echo trigger. The submission task owns the one
    /// broadcast of every message, so the trigger is only checked against
    /// the stored record and never re-sent.
    async fn echo(&self, connection: ConnectionId, user_id: &str, message: Message) -> Result<(), SyncError> {
        let Some(id) = message.canonical_id else {
            return Err(SyncError::invalid("sendMessage needs a persisted message"));
        };
        let Some(stored) = self.inner.store.message(&id).await? else {
            return Err(SyncError::invalid(format!("unknown message {id}")));
        };
        check_identity(user_id, &stored.sender_id)?;
        self.require_member(connection, &stored.room_id).await?;

        debug!(message = %id, "echo trigger acknowledged");
        Ok(())
    }

    async fn require_member(&self, connection: ConnectionId, room_id: &str) -> Result<(), SyncError> {
        if self.inner.registry.is_member(connection, room_id).await {
            Ok(())
        } else {
            Err(SyncError::invalid(format!("not joined to room {room_id}")))
        }
    }

    async fn push_status(&self, update: Option<StatusUpdate>) {
        if let Some(update) = update {
            let room_id = update.room_id.clone();
            self.inner.registry.broadcast(&room_id, ServerEvent::StatusUpdate(update)).await;
        }
    }
}

fn check_identity(user_id: &str, claimed: &str) -> Result<(), SyncError> {
    if user_id == claimed {
        Ok(())
    } else {
        warn!(user = user_id, claimed, "event names another user");
        Err(SyncError::invalid("userId does not match the connection"))
    }
}
