use std::collections::HashSet;

use axum::{Json, debug_handler, extract::State};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use super::{Chat, room::room_view, store};
use crate::{
    AppResult, ChatError,
    auth::AuthUser,
    db::{self, GROUP_LIMIT, Room, User},
    error::ChatResult,
    events::RoomView,
};

#[derive(Debug, Deserialize)]
pub struct NewGroupRoom {
    pub name: String,
    #[serde(default)]
    pub other_users_ids: Vec<Uuid>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create_group_room(
    State(db_pool): State<SqlitePool>,
    State(chat): State<Chat>,
    AuthUser(user): AuthUser,
    Json(request): Json<NewGroupRoom>,
) -> AppResult<Json<RoomView>> {
    let (room, created) = create_group(&db_pool, &user, &request).await?;
    if created {
        chat.announce_room(&room);
    }

    let mut conn = db_pool.acquire().await?;
    Ok(Json(room_view(&mut conn, &room, &user).await?))
}

/// Creates a group room of `creator` and the requested users, or returns the
/// group room that already has exactly those participants.
pub async fn create_group(db_pool: &SqlitePool, creator: &User, request: &NewGroupRoom) -> ChatResult<(Room, bool)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ChatError::bad_input("room name is required"));
    }

    let mut others = Vec::with_capacity(request.other_users_ids.len());
    for id in &request.other_users_ids {
        if !others.contains(id) {
            others.push(*id);
        }
    }
    if others.contains(&creator.id) {
        return Err(ChatError::bad_input("other_users_ids must not include yourself"));
    }
    if others.len() < 2 {
        return Err(ChatError::bad_input("a group room needs at least two other users"));
    }
    if others.len() as i64 + 1 > GROUP_LIMIT {
        return Err(ChatError::bad_input(format!(
            "a group room holds at most {GROUP_LIMIT} users"
        )));
    }

    let mut tx = db::begin_write(db_pool).await?;
    if store::find_users(&mut tx, &others).await?.len() != others.len() {
        return Err(ChatError::bad_input("some of the users do not exist"));
    }

    let mut participants = others;
    participants.push(creator.id);
    let wanted: HashSet<Uuid> = participants.iter().copied().collect();
    for room in store::rooms_for_user(&mut tx, creator.id).await? {
        if !room.peer_to_peer && room.participants.iter().copied().collect::<HashSet<_>>() == wanted {
            return Ok((room, false));
        }
    }

    let room = Room::group(name, participants);
    store::insert_room(&mut tx, &room).await?;
    tx.commit().await.map_err(ChatError::from_write)?;

    info!(room_id = %room.id, user_id = %creator.id, users = room.participants.len(), "group room created");
    Ok((room, true))
}
