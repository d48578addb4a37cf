use std::collections::HashMap;

use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::store;
use crate::{
    AppResult, ChatError, Page,
    auth::AuthUser,
    db::{Room, User},
    error::ChatResult,
    events::{MessageView, RoomView},
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn rooms(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<RoomView>>> {
    let mut conn = db_pool.acquire().await?;
    let rooms = store::rooms_for_user(&mut conn, user.id).await?;

    let mut views = Vec::with_capacity(rooms.len());
    for room in &rooms {
        views.push(room_view(&mut conn, room, &user).await?);
    }
    Ok(Json(views))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_messages(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> AppResult<Json<Vec<MessageView>>> {
    let mut conn = db_pool.acquire().await?;
    Ok(Json(history(&mut conn, &user, room_id, page).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn discover_rooms(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    Query(page): Query<Page>,
) -> AppResult<Json<Vec<RoomView>>> {
    let mut conn = db_pool.acquire().await?;
    Ok(Json(discover(&mut conn, &user, page).await?))
}

/// Group rooms `viewer` could join, each with its members.
pub async fn discover(conn: &mut SqliteConnection, viewer: &User, page: Page) -> ChatResult<Vec<RoomView>> {
    let (limit, offset) = page.bounds();
    let rooms = store::discoverable_rooms(conn, viewer.id, limit, offset).await?;

    let mut member_ids: Vec<Uuid> = rooms.iter().flat_map(|r| r.participants.iter().copied()).collect();
    member_ids.sort();
    member_ids.dedup();
    let members: HashMap<Uuid, User> = store::find_users(conn, &member_ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    Ok(rooms
        .iter()
        .map(|room| {
            let mut view = RoomView::for_viewer(room, None, None);
            view.users = room
                .participants
                .iter()
                .filter(|id| **id != viewer.id)
                .filter_map(|id| members.get(id).cloned())
                .collect();
            view
        })
        .collect())
}

/// `viewer`'s view of a room, private rooms shown under the other participant.
pub async fn room_view(conn: &mut SqliteConnection, room: &Room, viewer: &User) -> ChatResult<RoomView> {
    let other = match room.other_participant(viewer.id) {
        Some(other_id) if room.is_private() => store::find_user(conn, other_id).await?,
        _ => None,
    };
    let last_message = latest_message(conn, room, viewer.id).await?;
    Ok(RoomView::for_viewer(room, other.as_ref(), last_message))
}

async fn latest_message(conn: &mut SqliteConnection, room: &Room, viewer: Uuid) -> ChatResult<Option<MessageView>> {
    let Some(message_id) = room.latest_message_id else {
        return Ok(None);
    };
    let Some(message) = store::find_message(conn, message_id).await? else {
        return Ok(None);
    };
    let author = store::find_user(conn, message.created_by).await?;
    Ok(author.map(|author| MessageView::for_viewer(&message, &author, viewer)))
}

/// A page of a room's messages, newest first. Only participants may read.
pub async fn history(conn: &mut SqliteConnection, viewer: &User, room_id: Uuid, page: Page) -> ChatResult<Vec<MessageView>> {
    let room = store::find_room(conn, room_id)
        .await?
        .ok_or_else(|| ChatError::not_found("room not found"))?;
    if !room.has_participant(viewer.id) {
        return Err(ChatError::forbidden("you are not a participant of this room"));
    }

    let (limit, offset) = page.bounds();
    let messages = store::room_messages(conn, room_id, limit, offset).await?;

    let mut author_ids: Vec<Uuid> = messages.iter().map(|m| m.created_by).collect();
    author_ids.sort();
    author_ids.dedup();
    let authors: HashMap<Uuid, User> = store::find_users(conn, &author_ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    Ok(messages
        .iter()
        .filter_map(|message| {
            let author = authors.get(&message.created_by)?;
            Some(MessageView::for_viewer(message, author, viewer.id))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth,
        db::memory_pool,
        events::RoomType,
        rooms::{NewGroupRoom, Target, create_group, resolve},
    };

    async fn setup() -> (SqlitePool, User, User) {
        let db_pool = memory_pool().await.unwrap();
        let (alice, _) = auth::create_user(&db_pool, "alice", "alice@example.com").await.unwrap();
        let (bob, _) = auth::create_user(&db_pool, "bob", "bob@example.com").await.unwrap();
        (db_pool, alice, bob)
    }

    #[tokio::test]
    async fn appended_messages_come_back_in_history() {
        let (db_pool, alice, bob) = setup().await;
        let room_id = resolve(&db_pool, &alice, Target::Peer(bob.id), "hi").await.unwrap().room.id;
        let sent = resolve(&db_pool, &bob, Target::Room(room_id), "hello back").await.unwrap().message;

        let mut conn = db_pool.acquire().await.unwrap();
        let history = history(&mut conn, &alice, room_id, Page::default()).await.unwrap();

        assert_eq!(history.len(), 2);
        let newest = &history[0];
        assert_eq!(newest.id, sent.id);
        assert_eq!(newest.content, "hello back");
        assert_eq!(newest.sender_id, bob.id);
        assert_eq!(newest.sent_at, sent.created_at);
        assert!(!newest.my_message);
        assert_eq!(history[1].content, "hi");
        assert!(history[1].my_message);
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let (db_pool, alice, bob) = setup().await;
        for n in 0..5 {
            resolve(&db_pool, &alice, Target::Peer(bob.id), &format!("m{n}")).await.unwrap();
        }
        let room_id = {
            let mut conn = db_pool.acquire().await.unwrap();
            store::find_peer_room(&mut conn, alice.id, bob.id).await.unwrap().unwrap().id
        };

        let mut conn = db_pool.acquire().await.unwrap();
        let page = Page {
            limit: Some(2),
            offset: Some(1),
        };
        let contents: Vec<String> = history(&mut conn, &bob, room_id, page)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m3", "m2"]);
    }

    #[tokio::test]
    async fn history_is_for_participants_only() {
        let (db_pool, alice, bob) = setup().await;
        let (mallory, _) = auth::create_user(&db_pool, "mallory", "mallory@example.com").await.unwrap();
        let room_id = resolve(&db_pool, &alice, Target::Peer(bob.id), "hi").await.unwrap().room.id;

        let mut conn = db_pool.acquire().await.unwrap();
        let forbidden = history(&mut conn, &mallory, room_id, Page::default()).await;
        let missing = history(&mut conn, &alice, Uuid::now_v7(), Page::default()).await;

        assert!(matches!(forbidden, Err(ChatError::Forbidden(_))));
        assert!(matches!(missing, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn discovery_lists_other_peoples_groups() {
        let db_pool = memory_pool().await.unwrap();
        let mut users = Vec::new();
        for name in ["alice", "bob", "carol", "dave"] {
            users.push(auth::create_user(&db_pool, name, &format!("{name}@example.com")).await.unwrap().0);
        }
        let [alice, bob, carol, dave] = <[User; 4]>::try_from(users).unwrap();
        let request = |others: &[&User]| NewGroupRoom {
            name: "club".to_owned(),
            other_users_ids: others.iter().map(|u| u.id).collect(),
        };
        let (outside, _) = create_group(&db_pool, &bob, &request(&[&carol, &dave])).await.unwrap();
        create_group(&db_pool, &alice, &request(&[&bob, &carol])).await.unwrap();
        resolve(&db_pool, &bob, Target::Peer(carol.id), "private").await.unwrap();

        let mut conn = db_pool.acquire().await.unwrap();
        let found = discover(&mut conn, &alice, Page::default()).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].room_id, outside.id);
        assert_eq!(found[0].kind, RoomType::Group);
        assert_eq!(found[0].number_of_users, Some(3));
        let mut member_ids: Vec<Uuid> = found[0].users.iter().map(|u| u.id).collect();
        member_ids.sort();
        let mut expected = vec![bob.id, carol.id, dave.id];
        expected.sort();
        assert_eq!(member_ids, expected);
    }

    #[tokio::test]
    async fn private_rooms_are_named_for_the_viewer() {
        let (db_pool, alice, bob) = setup().await;
        let room = resolve(&db_pool, &alice, Target::Peer(bob.id), "hi").await.unwrap().room;

        let mut conn = db_pool.acquire().await.unwrap();
        let for_alice = room_view(&mut conn, &room, &alice).await.unwrap();
        let for_bob = room_view(&mut conn, &room, &bob).await.unwrap();

        assert_eq!(for_alice.kind, RoomType::Private);
        assert_eq!(for_alice.name, "bob");
        assert_eq!(for_bob.name, "alice");
        assert_eq!(for_bob.last_message.map(|m| m.my_message), Some(false));
    }
}
