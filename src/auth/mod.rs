use rand::{Rng, distr::Alphanumeric, seq::IndexedRandom};
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    ChatError,
    db::{self, User},
    error::ChatResult,
};

mod extract;

pub use extract::AuthUser;

const TOKEN_LEN: usize = 48;

/// Creates a user together with a fresh access token.
pub async fn create_user(db_pool: &SqlitePool, name: &str, email: &str) -> ChatResult<(User, String)> {
    let user = User {
        id: Uuid::now_v7(),
        name: name.to_owned(),
        email: email.to_owned(),
        created_at: OffsetDateTime::now_utc(),
    };

    let mut tx = db::begin_write(db_pool).await?;
    sqlx::query("INSERT INTO users (id,name,email,created_at) VALUES (?,?,?,?)")
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match ChatError::from_write(e) {
            ChatError::Conflict(_) => ChatError::bad_input("user is already registered"),
            other => other,
        })?;
    let token = issue_token(&mut tx, user.id).await?;
    tx.commit().await?;

    info!(user_id = %user.id, "user created");
    Ok((user, token))
}

pub async fn issue_token(conn: &mut SqliteConnection, user_id: Uuid) -> ChatResult<String> {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    sqlx::query("INSERT INTO access_tokens (token,user_id) VALUES (?,?)")
        .bind(&token)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(token)
}

pub async fn user_for_token(db_pool: &SqlitePool, token: &str) -> ChatResult<User> {
    sqlx::query_as::<_, User>(
        "SELECT u.id,u.name,u.email,u.created_at FROM access_tokens t JOIN users u ON u.id=t.user_id WHERE t.token=?",
    )
    .bind(token)
    .fetch_optional(db_pool)
    .await?
    .ok_or_else(|| ChatError::unauthenticated("invalid access token"))
}

pub fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
    ];
    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    let mut rng = rand::rng();
    match (adjectives.choose(&mut rng), nouns.choose(&mut rng)) {
        (Some(adjective), Some(noun)) => format!("{adjective} {noun}"),
        _ => "Nameless User".to_owned(),
    }
}
