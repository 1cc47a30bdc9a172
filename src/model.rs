use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle stage of a message.
///
/// `Sending < Sent < Delivered < Seen` is the only order a message ever moves
/// through. `Failed` sits outside that order: it ends one submission attempt
/// and never takes part in delivery aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Seen,
    Failed,
}

impl MessageStatus {
    pub fn rank(self) -> Option<u8> {
        use MessageStatus::*;
        match self {
            Sending => Some(0),
            Sent => Some(1),
            Delivered => Some(2),
            Seen => Some(3),
            Failed => None,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        use MessageStatus::*;
        match rank {
            0 => Some(Sending),
            1 => Some(Sent),
            2 => Some(Delivered),
            3 => Some(Seen),
            _ => None,
        }
    }

    /// True only when both statuses are ranked and `self` comes strictly after `other`.
    pub fn is_later_than(self, other: MessageStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }

    /// Returns `next` if moving there is a forward step, `None` otherwise.
    pub fn advance(self, next: MessageStatus) -> Option<MessageStatus> {
        next.is_later_than(self).then_some(next)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
            MessageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A chat message as seen by the server and by clients.
///
/// Before the store accepts it a message only has a `local_id`; the store then
/// mints `canonical_id`. Both are kept side by side afterwards so a client can
/// line the confirmed record up with its optimistic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", alias = "canonicalId", default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,
    #[serde(alias = "tempId", default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub room_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_display_name: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: MessageStatus,
}

impl Message {
    /// A client-side entry that has not been submitted yet.
    pub fn optimistic(
        local_id: impl Into<String>,
        room_id: impl Into<String>,
        sender: &User,
        body: impl Into<String>,
        replied_to_id: Option<String>,
    ) -> Message {
        Message {
            canonical_id: None,
            local_id: Some(local_id.into()),
            room_id: room_id.into(),
            sender_id: sender.user_id.clone(),
            sender_display_name: sender.display_name.clone(),
            body: body.into(),
            replied_to_id,
            created_at: OffsetDateTime::now_utc(),
            status: MessageStatus::Sending,
        }
    }
}

/// A validated submission handed to the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub local_id: Option<String>,
    pub room_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub body: String,
    pub replied_to_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
}
