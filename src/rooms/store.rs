//! Room, participant and message rows.
//!
//! Every function takes a plain connection so callers decide the transaction
//! boundary. Writes go through [`ChatError::from_write`] so a racing writer
//! surfaces as `Conflict`.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    ChatError,
    db::{self, Message, MessageKind, Room, User},
    error::ChatResult,
};

pub async fn find_user(conn: &mut SqliteConnection, user_id: Uuid) -> ChatResult<Option<User>> {
    Ok(
        sqlx::query_as("SELECT id,name,email,created_at FROM users WHERE id=?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

pub async fn find_users(conn: &mut SqliteConnection, user_ids: &[Uuid]) -> ChatResult<Vec<User>> {
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id,name,email,created_at FROM users WHERE id IN (");
    let mut ids = query.separated(",");
    for user_id in user_ids {
        ids.push_bind(*user_id);
    }
    ids.push_unseparated(")");
    Ok(query.build_query_as().fetch_all(&mut *conn).await?)
}

pub async fn participants(conn: &mut SqliteConnection, room_id: Uuid) -> ChatResult<Vec<Uuid>> {
    Ok(
        sqlx::query_scalar("SELECT user_id FROM room_participants WHERE room_id=? ORDER BY position")
            .bind(room_id)
            .fetch_all(&mut *conn)
            .await?,
    )
}

async fn with_participants(conn: &mut SqliteConnection, room: Option<Room>) -> ChatResult<Option<Room>> {
    let Some(mut room) = room else {
        return Ok(None);
    };
    room.participants = participants(conn, room.id).await?;
    Ok(Some(room))
}

pub async fn find_room(conn: &mut SqliteConnection, room_id: Uuid) -> ChatResult<Option<Room>> {
    let room = sqlx::query_as(
        "SELECT id,name,users_limit,peer_to_peer,latest_message_id,created_at,updated_at FROM rooms WHERE id=?",
    )
    .bind(room_id)
    .fetch_optional(&mut *conn)
    .await?;
    with_participants(conn, room).await
}

/// The unique peer to peer room of an unordered pair, if it exists.
pub async fn find_peer_room(conn: &mut SqliteConnection, a: Uuid, b: Uuid) -> ChatResult<Option<Room>> {
    let room = sqlx::query_as(
        "SELECT id,name,users_limit,peer_to_peer,latest_message_id,created_at,updated_at FROM rooms WHERE pair_key=? AND peer_to_peer=1",
    )
    .bind(db::pair_key(a, b))
    .fetch_optional(&mut *conn)
    .await?;
    with_participants(conn, room).await
}

/// Rooms `user_id` takes part in, most recently active first.
pub async fn rooms_for_user(conn: &mut SqliteConnection, user_id: Uuid) -> ChatResult<Vec<Room>> {
    let rooms: Vec<Room> = sqlx::query_as(
        r#"SELECT r.id,r.name,r.users_limit,r.peer_to_peer,r.latest_message_id,r.created_at,r.updated_at
        FROM rooms r
        JOIN room_participants p ON p.room_id=r.id
        LEFT JOIN messages m ON m.id=r.latest_message_id
        WHERE p.user_id=?
        ORDER BY COALESCE(m.created_at, r.updated_at) DESC"#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut loaded = Vec::with_capacity(rooms.len());
    for mut room in rooms {
        room.participants = participants(conn, room.id).await?;
        loaded.push(room);
    }
    Ok(loaded)
}

/// Group rooms of more than two members that `user_id` is not part of, in random order.
pub async fn discoverable_rooms(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> ChatResult<Vec<Room>> {
    let rooms: Vec<Room> = sqlx::query_as(
        r#"SELECT r.id,r.name,r.users_limit,r.peer_to_peer,r.latest_message_id,r.created_at,r.updated_at
        FROM rooms r
        WHERE r.peer_to_peer=0
        AND NOT EXISTS (SELECT 1 FROM room_participants p WHERE p.room_id=r.id AND p.user_id=?)
        AND (SELECT COUNT(*) FROM room_participants p WHERE p.room_id=r.id) > 2
        ORDER BY RANDOM() LIMIT ? OFFSET ?"#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;

    let mut loaded = Vec::with_capacity(rooms.len());
    for mut room in rooms {
        room.participants = participants(conn, room.id).await?;
        loaded.push(room);
    }
    Ok(loaded)
}

/// Fails with `Conflict` when a peer to peer room for the same pair already exists.
pub async fn insert_room(conn: &mut SqliteConnection, room: &Room) -> ChatResult<()> {
    sqlx::query(
        "INSERT INTO rooms (id,name,users_limit,peer_to_peer,pair_key,latest_message_id,created_at,updated_at) VALUES (?,?,?,?,?,?,?,?)",
    )
    .bind(room.id)
    .bind(&room.name)
    .bind(room.users_limit)
    .bind(room.peer_to_peer)
    .bind(room.pair_key())
    .bind(room.latest_message_id)
    .bind(room.created_at)
    .bind(room.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(ChatError::from_write)?;

    for (position, user_id) in room.participants.iter().enumerate() {
        sqlx::query("INSERT INTO room_participants (room_id,user_id,position) VALUES (?,?,?)")
            .bind(room.id)
            .bind(user_id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await
            .map_err(ChatError::from_write)?;
    }
    Ok(())
}

pub async fn insert_message(
    conn: &mut SqliteConnection,
    room_id: Uuid,
    author: Uuid,
    content: &str,
    kind: MessageKind,
) -> ChatResult<Message> {
    sqlx::query_as(
        "INSERT INTO messages (room_id,created_by,content,type,created_at) VALUES (?,?,?,?,?) RETURNING id,room_id,created_by,content,type,created_at,edited_at",
    )
    .bind(room_id)
    .bind(author)
    .bind(content)
    .bind(kind.as_str())
    .bind(OffsetDateTime::now_utc())
    .fetch_one(&mut *conn)
    .await
    .map_err(ChatError::from_write)
}

pub async fn set_latest_message(conn: &mut SqliteConnection, room: &mut Room, message: &Message) -> ChatResult<()> {
    let now = OffsetDateTime::now_utc();
    sqlx::query("UPDATE rooms SET latest_message_id=?, updated_at=? WHERE id=?")
        .bind(message.id)
        .bind(now)
        .bind(room.id)
        .execute(&mut *conn)
        .await
        .map_err(ChatError::from_write)?;
    room.latest_message_id = Some(message.id);
    room.updated_at = now;
    Ok(())
}

pub async fn find_message(conn: &mut SqliteConnection, message_id: i64) -> ChatResult<Option<Message>> {
    Ok(
        sqlx::query_as("SELECT id,room_id,created_by,content,type,created_at,edited_at FROM messages WHERE id=?")
            .bind(message_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

/// Newest first.
pub async fn room_messages(
    conn: &mut SqliteConnection,
    room_id: Uuid,
    limit: i64,
    offset: i64,
) -> ChatResult<Vec<Message>> {
    Ok(sqlx::query_as(
        "SELECT id,room_id,created_by,content,type,created_at,edited_at FROM messages WHERE room_id=? ORDER BY id DESC LIMIT ? OFFSET ?",
    )
    .bind(room_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?)
}
