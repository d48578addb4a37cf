use std::time::Duration;

use axum::{Json, debug_handler, extract::State};
use sqlx::SqlitePool;
use tracing::error;
use uuid::Uuid;

use super::resolve::{self, Resolution, Target};
use crate::{
    AppResult, ChatError,
    auth::AuthUser,
    db::{Room, User},
    error::ChatResult,
    events::{ClientEvent, MessageView, RoomView, SendMessage, ServerEvent},
    hub::Dispatcher,
};

pub const MAX_CONTENT_CHARS: usize = 255;

/// Turns a chat send into a persisted message plus the live events announcing it.
#[derive(Debug, Clone)]
pub struct Chat {
    db_pool: SqlitePool,
    dispatcher: Dispatcher,
    new_room_delay: Duration,
}

impl Chat {
    pub fn new(db_pool: SqlitePool, dispatcher: Dispatcher, new_room_delay: Duration) -> Self {
        Self {
            db_pool,
            dispatcher,
            new_room_delay,
        }
    }

    /// Entry point for payloads read off a live connection.
    pub async fn receive(&self, sender: &User, payload: &[u8]) -> ChatResult<()> {
        let ClientEvent::Message(request) = serde_json::from_slice(payload)
            .map_err(|e| ChatError::bad_input(format!("malformed event: {e}")))?;
        self.send(sender, request).await.map(|_| ())
    }

    pub async fn send(&self, sender: &User, request: SendMessage) -> ChatResult<Resolution> {
        validate_content(&request.content)?;
        let target = Target::from_request(sender.id, request.room_id, request.other_user_id)?;

        let resolution = resolve::resolve(&self.db_pool, sender, target, &request.content)
            .await
            .inspect_err(|e| {
                if !e.is_rejection() {
                    error!(user_id = %sender.id, ?target, operation = "send_message", error = %e, "failed to store message");
                }
            })?;

        self.announce(sender, &resolution);
        Ok(resolution)
    }

    /// `new_room` goes out first when the send created the room; its message
    /// follows after the configured delay so clients can build the room first.
    fn announce(&self, sender: &User, resolution: &Resolution) {
        let audience = audience(&resolution.room, sender.id);
        let message = resolution.message.clone();
        let author = sender.clone();
        let message_event = move |viewer: Uuid| ServerEvent::message(MessageView::for_viewer(&message, &author, viewer));

        if !resolution.created {
            self.dispatcher.broadcast(&audience, message_event);
            return;
        }

        self.dispatcher.broadcast(&audience, |viewer| {
            let other = if viewer == sender.id {
                resolution.peer.as_ref()
            } else {
                Some(sender)
            };
            let first = MessageView::for_viewer(&resolution.message, sender, viewer);
            ServerEvent::new_room(RoomView::for_viewer(&resolution.room, other, Some(first)))
        });

        let dispatcher = self.dispatcher.clone();
        let delay = self.new_room_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.broadcast(&audience, message_event);
        });
    }

    /// Tells every participant of a freshly created group room about it.
    pub fn announce_room(&self, room: &Room) {
        self.dispatcher.broadcast(&room.participants, |_| {
            ServerEvent::new_room(RoomView::for_viewer(room, None, None))
        });
    }
}

/// The sender first, then everyone else in the room.
fn audience(room: &Room, sender: Uuid) -> Vec<Uuid> {
    std::iter::once(sender)
        .chain(room.participants.iter().copied().filter(|id| *id != sender))
        .collect()
}

fn validate_content(content: &str) -> ChatResult<()> {
    if content.trim().is_empty() {
        return Err(ChatError::bad_input("content is required"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::bad_input(format!(
            "content must be at most {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send_message_sync(
    State(chat): State<Chat>,
    AuthUser(user): AuthUser,
    Json(request): Json<SendMessage>,
) -> AppResult<Json<MessageView>> {
    let resolution = chat.send(&user, request).await?;
    Ok(Json(MessageView::for_viewer(&resolution.message, &user, user.id)))
}

#[cfg(test)]
mod tests {
    use tokio::{sync::mpsc, time::timeout};

    use super::*;
    use crate::{
        auth,
        db::memory_pool,
        events::{EventData, EventType},
        hub::{Hub, SessionSettings},
    };

    const DELAY: Duration = Duration::from_millis(50);

    struct Fixture {
        chat: Chat,
        hub: Hub,
        alice: User,
        bob: User,
    }

    async fn fixture() -> Fixture {
        let db_pool = memory_pool().await.unwrap();
        let (alice, _) = auth::create_user(&db_pool, "alice", "alice@example.com").await.unwrap();
        let (bob, _) = auth::create_user(&db_pool, "bob", "bob@example.com").await.unwrap();
        let hub = Hub::new(SessionSettings::default());
        let chat = Chat::new(db_pool, hub.dispatcher(), DELAY);
        Fixture { chat, hub, alice, bob }
    }

    // roomier than a real session queue so a test can watch the whole sequence
    fn connect(hub: &Hub, user: &User) -> mpsc::Receiver<ServerEvent> {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (close_tx, _close_rx) = mpsc::channel(1);
        let _ = hub.registry().register(user.id, out_tx, close_tx);
        out_rx
    }

    fn to(user: &User, content: &str) -> SendMessage {
        SendMessage {
            other_user_id: Some(user.id),
            room_id: None,
            content: content.to_owned(),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event arrived")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn new_room_precedes_the_delayed_message() {
        let Fixture { chat, hub, alice, bob } = fixture().await;
        let mut alice_rx = connect(&hub, &alice);
        let mut bob_rx = connect(&hub, &bob);

        let resolution = chat.send(&alice, to(&bob, "hi")).await.unwrap();
        assert!(resolution.created);

        let event = next(&mut bob_rx).await;
        assert_eq!(event.kind, EventType::NewRoom);
        let EventData::NewRoom(room) = &event.data else { panic!("expected a room") };
        assert_eq!(room.name, "alice");
        assert_eq!(room.other_user.as_ref().map(|u| u.id), Some(alice.id));
        assert_eq!(room.last_message.as_ref().map(|m| m.content.as_str()), Some("hi"));

        // the message is held back for the delay
        assert!(bob_rx.try_recv().is_err());

        let event = next(&mut bob_rx).await;
        let EventData::Message(message) = &event.data else { panic!("expected a message") };
        assert!(!message.my_message);
        assert_eq!(message.sender_id, alice.id);

        let EventData::NewRoom(room) = next(&mut alice_rx).await.data else { panic!("expected a room") };
        assert_eq!(room.name, "bob");
        let EventData::Message(message) = next(&mut alice_rx).await.data else { panic!("expected a message") };
        assert!(message.my_message);
    }

    #[tokio::test]
    async fn existing_rooms_get_the_message_immediately() {
        let Fixture { chat, hub, alice, bob } = fixture().await;
        chat.send(&alice, to(&bob, "hi")).await.unwrap();
        let mut bob_rx = connect(&hub, &bob);

        chat.send(&alice, to(&bob, "again")).await.unwrap();

        let event = bob_rx.try_recv().unwrap();
        assert_eq!(event.kind, EventType::Message);
        tokio::time::sleep(DELAY * 2).await;
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_recipients_do_not_fail_the_send() {
        let Fixture { chat, alice, bob, .. } = fixture().await;
        assert!(chat.send(&alice, to(&bob, "anyone there?")).await.is_ok());
    }

    #[tokio::test]
    async fn receive_parses_the_inbound_envelope() {
        let Fixture { chat, alice, bob, .. } = fixture().await;
        let raw = serde_json::json!({
            "event": "message",
            "data": { "other_user_id": bob.id, "content": "hi" }
        });

        chat.receive(&alice, raw.to_string().as_bytes()).await.unwrap();
        let err = chat.receive(&alice, b"not json").await.unwrap_err();
        assert!(matches!(err, ChatError::BadInput(_)));
    }

    #[tokio::test]
    async fn content_must_be_present_and_short() {
        let Fixture { chat, alice, bob, .. } = fixture().await;

        let blank = chat.send(&alice, to(&bob, "   ")).await.unwrap_err();
        let long = chat.send(&alice, to(&bob, &"x".repeat(MAX_CONTENT_CHARS + 1))).await.unwrap_err();

        assert!(matches!(blank, ChatError::BadInput(_)));
        assert!(matches!(long, ChatError::BadInput(_)));
        assert!(chat.send(&alice, to(&bob, &"x".repeat(MAX_CONTENT_CHARS))).await.is_ok());
    }

    #[test]
    fn audience_puts_the_sender_first() {
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        let carol = Uuid::now_v7();
        let room = Room::group("trio", vec![bob, alice, carol]);

        assert_eq!(audience(&room, alice), vec![alice, bob, carol]);
    }
}
