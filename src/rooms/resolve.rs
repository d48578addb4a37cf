//! Find-or-create of the target room plus the message append, in one transaction.

use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::store;
use crate::{
    ChatError,
    db::{self, Message, MessageKind, Room, User},
    error::ChatResult,
};

/// Where a send goes: an existing room, or the peer to peer room with a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Room(Uuid),
    Peer(Uuid),
}

impl Target {
    pub fn from_request(sender: Uuid, room_id: Option<Uuid>, other_user_id: Option<Uuid>) -> ChatResult<Target> {
        match (room_id, other_user_id) {
            (Some(_), Some(_)) => Err(ChatError::bad_input(
                "room_id and other_user_id are mutually exclusive",
            )),
            (None, None) => Err(ChatError::bad_input("room_id or other_user_id is required")),
            (Some(room_id), None) => Ok(Target::Room(room_id)),
            (None, Some(peer)) if peer == sender => {
                Err(ChatError::bad_input("cannot send a message to yourself"))
            }
            (None, Some(peer)) => Ok(Target::Peer(peer)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub room: Room,
    pub message: Message,
    /// The other participant, for peer to peer rooms.
    pub peer: Option<User>,
    /// Whether the room was created by this send.
    pub created: bool,
}

/// Appends `content` from `sender` to the room `target` designates, creating
/// the peer to peer room first when the pair has none.
///
/// Two first contacts between the same pair race on the rooms `pair_key`
/// constraint. The loser gets `Conflict` and retries once, which finds the
/// winner's room and appends to it.
pub async fn resolve(db_pool: &SqlitePool, sender: &User, target: Target, content: &str) -> ChatResult<Resolution> {
    match attempt(db_pool, sender, target, content).await {
        Err(ChatError::Conflict(reason)) => {
            debug!(user_id = %sender.id, ?target, %reason, "room resolution lost a race, retrying");
            attempt(db_pool, sender, target, content).await
        }
        resolved => resolved,
    }
}

async fn attempt(db_pool: &SqlitePool, sender: &User, target: Target, content: &str) -> ChatResult<Resolution> {
    let mut tx = db::begin_write(db_pool).await?;

    let (mut room, peer, created) = match target {
        Target::Room(room_id) => {
            let room = store::find_room(&mut tx, room_id)
                .await?
                .ok_or_else(|| ChatError::not_found("room not found"))?;
            if !room.has_participant(sender.id) {
                return Err(ChatError::forbidden("you are not a participant of this room"));
            }
            let peer = match room.other_participant(sender.id) {
                Some(peer_id) if room.is_private() => store::find_user(&mut tx, peer_id).await?,
                _ => None,
            };
            (room, peer, false)
        }
        Target::Peer(peer_id) => {
            let peer = store::find_user(&mut tx, peer_id)
                .await?
                .ok_or_else(|| ChatError::not_found("user not found"))?;
            match store::find_peer_room(&mut tx, sender.id, peer.id).await? {
                Some(room) => (room, Some(peer), false),
                None => {
                    let room = Room::peer_to_peer(sender, &peer);
                    store::insert_room(&mut tx, &room).await?;
                    (room, Some(peer), true)
                }
            }
        }
    };

    let message = store::insert_message(&mut tx, room.id, sender.id, content, MessageKind::Text).await?;
    store::set_latest_message(&mut tx, &mut room, &message).await?;
    tx.commit().await.map_err(ChatError::from_write)?;

    if created {
        info!(room_id = %room.id, user_id = %sender.id, "peer to peer room created");
    }
    Ok(Resolution {
        room,
        message,
        peer,
        created,
    })
}
