//! JSON shapes exchanged over HTTP and the real-time channel.

use serde::{Deserialize, Serialize};

use crate::model::{Message, MessageStatus, Room, User};

/// Body of `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub room_id: String,
    pub sender_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_id: Option<String>,
    #[serde(default, alias = "tempId", skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesBody {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomBody {
    pub room: Room,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsBody {
    pub rooms: Vec<Room>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoomRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBody {
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Status change pushed to a room. Carries either one id or a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub canonical_ids: Vec<String>,
    pub status: MessageStatus,
}

impl StatusUpdate {
    pub fn single(room_id: impl Into<String>, canonical_id: impl Into<String>, status: MessageStatus) -> Self {
        StatusUpdate {
            room_id: room_id.into(),
            canonical_id: Some(canonical_id.into()),
            canonical_ids: Vec::new(),
            status,
        }
    }

    pub fn batch(room_id: impl Into<String>, canonical_ids: Vec<String>, status: MessageStatus) -> Self {
        StatusUpdate {
            room_id: room_id.into(),
            canonical_id: None,
            canonical_ids,
            status,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.canonical_id
            .iter()
            .chain(self.canonical_ids.iter())
            .map(String::as_str)
    }
}

/// Events a client sends over the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
        user_id: String,
    },
    LeaveRoom {
        room_id: String,
        user_id: String,
    },
    /// Echo trigger sent after a successful `POST /messages`.
    SendMessage {
        message: Message,
    },
    MarkDelivered {
        canonical_id: String,
        room_id: String,
        user_id: String,
    },
    MarkSeen {
        canonical_ids: Vec<String>,
        room_id: String,
        user_id: String,
    },
}

/// Events the server pushes over the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage { message: Message },
    StatusUpdate(StatusUpdate),
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_are_tagged() {
        let raw = r#"{"type":"markSeen","canonicalIds":["m1","m2"],"roomId":"r1","userId":"u2"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::MarkSeen {
                canonical_ids: vec!["m1".into(), "m2".into()],
                room_id: "r1".into(),
                user_id: "u2".into(),
            }
        );
    }

    #[test]
    fn batch_status_update_shape() {
        let event = ServerEvent::StatusUpdate(StatusUpdate::batch(
            "r1",
            vec!["m1".into(), "m2".into()],
            MessageStatus::Seen,
        ));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "statusUpdate");
        assert_eq!(json["canonicalIds"], serde_json::json!(["m1", "m2"]));
        assert_eq!(json["status"], "seen");
        assert!(json.get("canonicalId").is_none());
    }
}
