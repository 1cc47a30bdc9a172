//! Per-message delivery status.
//!
//! The tracker folds acknowledgements from every recipient into the single
//! status the sender sees. It only ever moves a status forward along
//! `sent < delivered < seen`; anything else is dropped, so acknowledgements
//! may arrive in any order.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    error::SyncError,
    model::{Message, MessageStatus},
    protocol::StatusUpdate,
    store::MessageStore,
};

pub const DEFAULT_TRACKED_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct Tracked {
    room_id: String,
    sender_id: String,
    status: MessageStatus,
}

/// Holds the statuses still in motion. Entries leave once they reach `seen`
/// or fall out of the recency window; the store has the rest.
pub struct DeliveryTracker {
    store: Arc<dyn MessageStore>,
    entries: Mutex<LruCache<String, Tracked>>,
}

impl DeliveryTracker {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_capacity(store, DEFAULT_TRACKED_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn MessageStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Starts tracking a persisted message. Returns false if it was already
    /// tracked or has no canonical id.
    pub async fn track(&self, message: &Message) -> bool {
        let Some(id) = &message.canonical_id else {
            return false;
        };
        if message.status == MessageStatus::Failed {
            return false;
        }

        let mut entries = self.entries.lock().await;
        if entries.contains(id) {
            return false;
        }
        entries.put(
            id.clone(),
            Tracked {
                room_id: message.room_id.clone(),
                sender_id: message.sender_id.clone(),
                status: message.status,
            },
        );
        true
    }

    pub async fn is_tracked(&self, canonical_id: &str) -> bool {
        self.entries.lock().await.contains(canonical_id)
    }

    pub async fn tracked_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Cached status, if the message is still tracked.
    pub async fn status(&self, canonical_id: &str) -> Option<MessageStatus> {
        self.entries.lock().await.peek(canonical_id).map(|t| t.status)
    }

    /// A recipient's client acknowledged receipt of the message.
    pub async fn mark_delivered(
        &self,
        canonical_id: &str,
        room_id: &str,
        observer_id: &str,
    ) -> Result<Option<StatusUpdate>, SyncError> {
        let advanced = self
            .transition(canonical_id, room_id, observer_id, MessageStatus::Delivered)
            .await?;
        Ok(advanced.then(|| StatusUpdate::single(room_id, canonical_id, MessageStatus::Delivered)))
    }

    /// A recipient read a batch of messages. The returned update lists only
    /// the ids that actually moved.
    pub async fn mark_seen(
        &self,
        canonical_ids: &[String],
        room_id: &str,
        observer_id: &str,
    ) -> Result<Option<StatusUpdate>, SyncError> {
        let mut visited = HashSet::new();
        let mut advanced = Vec::new();
        for id in canonical_ids {
            if !visited.insert(id.as_str()) {
                continue;
            }
            if self.transition(id, room_id, observer_id, MessageStatus::Seen).await? {
                advanced.push(id.clone());
            }
        }

        Ok((!advanced.is_empty()).then(|| StatusUpdate::batch(room_id, advanced, MessageStatus::Seen)))
    }

    async fn transition(
        &self,
        canonical_id: &str,
        room_id: &str,
        observer_id: &str,
        target: MessageStatus,
    ) -> Result<bool, SyncError> {
        let Some(tracked) = self.lookup(canonical_id).await? else {
            debug!(message = canonical_id, "ack for unknown message");
            return Ok(false);
        };
        if tracked.room_id != room_id || tracked.sender_id == observer_id {
            return Ok(false);
        }

        let advanced = {
            let mut entries = self.entries.lock().await;
            if !entries.contains(canonical_id) {
                entries.put(canonical_id.to_owned(), tracked);
            }
            match entries.get_mut(canonical_id) {
                Some(entry) => match entry.status.advance(target) {
                    Some(next) => {
                        entry.status = next;
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };
        if !advanced {
            return Ok(false);
        }

        debug!(message = canonical_id, observer = observer_id, status = %target, "status advanced");
        // the stored status is monotonic too, so racing writers cannot regress it
        match self.store.update_status(canonical_id, target).await {
            Ok(_) if target == MessageStatus::Seen => {
                self.entries.lock().await.pop(canonical_id);
            }
            Ok(_) => {}
            Err(err) => warn!(message = canonical_id, "status write-through failed: {err}"),
        }
        Ok(true)
    }

    async fn lookup(&self, canonical_id: &str) -> Result<Option<Tracked>, SyncError> {
        if let Some(tracked) = self.entries.lock().await.get(canonical_id) {
            return Ok(Some(tracked.clone()));
        }

        let Some(message) = self.store.message(canonical_id).await? else {
            return Ok(None);
        };
        Ok(Some(Tracked {
            room_id: message.room_id,
            sender_id: message.sender_id,
            status: message.status,
        }))
    }
}
