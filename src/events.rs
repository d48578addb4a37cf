//! Wire shapes exchanged with live connections and returned by the JSON API.
//!
//! Outbound events share one envelope, `{ type, timestamp, data }`, where
//! `type` is `message` or `new_room`. Clients submit chat sends as
//! `{ event: "message", data: { other_user_id?, room_id?, content } }`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{Message, MessageKind, Room, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    NewRoom,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            EventType::Message => "message",
            EventType::NewRoom => "new_room",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub data: EventData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Message(MessageView),
    NewRoom(RoomView),
}

impl ServerEvent {
    pub fn message(view: MessageView) -> ServerEvent {
        ServerEvent {
            kind: EventType::Message,
            timestamp: OffsetDateTime::now_utc(),
            data: EventData::Message(view),
        }
    }

    pub fn new_room(view: RoomView) -> ServerEvent {
        ServerEvent {
            kind: EventType::NewRoom,
            timestamp: OffsetDateTime::now_utc(),
            data: EventData::NewRoom(view),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Message(SendMessage),
}

/// A chat send, either into an existing room or to a peer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessage {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub other_user_id: Option<Uuid>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub room_id: Option<Uuid>,
    pub content: String,
}

// clients send "" for an absent target
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(id) => Uuid::parse_str(id).map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    pub my_message: bool,
    pub sender_id: Uuid,
    pub room_id: Uuid,
    pub sent_by: User,
}

impl MessageView {
    pub fn for_viewer(message: &Message, author: &User, viewer: Uuid) -> MessageView {
        MessageView {
            id: message.id,
            content: message.content.clone(),
            kind: message.kind,
            sent_at: message.created_at,
            edited_at: message.edited_at,
            my_message: message.created_by == viewer,
            sender_id: message.created_by,
            room_id: message.room_id,
            sent_by: author.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Private,
    Group,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomView {
    pub room_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_users: Option<usize>,
    pub user_ids: Vec<Uuid>,
    /// Members shown to someone browsing rooms they are not in.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_user: Option<User>,
    pub last_message: Option<MessageView>,
}

impl RoomView {
    /// A private room is shown under the other participant's name; `other_user`
    /// is ignored for group rooms.
    pub fn for_viewer(room: &Room, other_user: Option<&User>, last_message: Option<MessageView>) -> RoomView {
        let mut view = RoomView {
            room_id: room.id,
            name: room.name.clone(),
            kind: RoomType::Group,
            created_at: room.created_at,
            number_of_users: Some(room.participants.len()),
            user_ids: room.participants.clone(),
            users: Vec::new(),
            other_user: None,
            last_message,
        };
        if room.is_private() {
            view.kind = RoomType::Private;
            view.number_of_users = None;
            if let Some(other) = other_user {
                view.name = other.name.clone();
                view.other_user = Some(other.clone());
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: &str) -> User {
        User {
            id: Uuid::now_v7(),
            name: name.to_owned(),
            email: format!("{name}@example.com"),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn envelope_carries_type_timestamp_and_data() {
        let alice = user("alice");
        let message = Message {
            id: 7,
            room_id: Uuid::now_v7(),
            created_by: alice.id,
            content: "hi".to_owned(),
            kind: MessageKind::Text,
            created_at: OffsetDateTime::now_utc(),
            edited_at: None,
        };
        let event = ServerEvent::message(MessageView::for_viewer(&message, &alice, alice.id));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "message");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["data"]["id"], 7);
        assert_eq!(value["data"]["type"], "text");
        assert_eq!(value["data"]["my_message"], true);
        assert_eq!(value["data"]["edited_at"], serde_json::Value::Null);
        assert_eq!(value["data"]["sent_by"]["name"], "alice");
    }

    #[test]
    fn private_room_is_named_after_the_other_user() {
        let alice = user("alice");
        let bob = user("bob");
        let room = Room::peer_to_peer(&alice, &bob);

        let view = RoomView::for_viewer(&room, Some(&alice), None);
        let value = serde_json::to_value(ServerEvent::new_room(view)).unwrap();

        assert_eq!(value["type"], "new_room");
        assert_eq!(value["data"]["type"], "private");
        assert_eq!(value["data"]["name"], "alice");
        assert_eq!(value["data"]["other_user"]["id"], json!(alice.id));
        assert!(value["data"].get("number_of_users").is_none());
    }

    #[test]
    fn parses_inbound_send_with_blank_room() {
        let peer = Uuid::now_v7();
        let raw = json!({
            "event": "message",
            "data": { "other_user_id": peer, "room_id": "", "content": "hi" }
        });
        let ClientEvent::Message(send) = serde_json::from_value(raw).unwrap();
        assert_eq!(send.other_user_id, Some(peer));
        assert_eq!(send.room_id, None);
        assert_eq!(send.content, "hi");
    }

    #[test]
    fn rejects_unknown_inbound_event() {
        let raw = json!({ "event": "typing", "data": {} });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }
}
