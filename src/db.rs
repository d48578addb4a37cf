use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{
    FromRow, Sqlite, SqlitePool, Transaction,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use time::OffsetDateTime;
use uuid::Uuid;

pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Peer to peer rooms hold exactly this many participants.
pub const PEER_TO_PEER_LIMIT: i64 = 2;
pub const GROUP_LIMIT: i64 = 99;

/// How long a writer waits for the database write lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub users_limit: i64,
    pub peer_to_peer: bool,
    pub latest_message_id: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,

    // persisted in room_participants, ordered by position
    #[sqlx(skip)]
    pub participants: Vec<Uuid>,
}

impl Room {
    pub fn peer_to_peer(sender: &User, peer: &User) -> Room {
        let now = OffsetDateTime::now_utc();
        Room {
            id: Uuid::now_v7(),
            name: format!("private chat between {} and {}", sender.name, peer.name),
            users_limit: PEER_TO_PEER_LIMIT,
            peer_to_peer: true,
            latest_message_id: None,
            created_at: now,
            updated_at: now,
            participants: vec![sender.id, peer.id],
        }
    }

    pub fn group(name: &str, participants: Vec<Uuid>) -> Room {
        let now = OffsetDateTime::now_utc();
        Room {
            id: Uuid::now_v7(),
            name: name.to_owned(),
            users_limit: GROUP_LIMIT,
            peer_to_peer: false,
            latest_message_id: None,
            created_at: now,
            updated_at: now,
            participants,
        }
    }

    pub fn is_private(&self) -> bool {
        self.peer_to_peer && self.participants.len() == 2
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The participant of a private room that is not `viewer`.
    pub fn other_participant(&self, viewer: Uuid) -> Option<Uuid> {
        self.participants.iter().copied().find(|id| *id != viewer)
    }

    pub fn pair_key(&self) -> Option<String> {
        match self.participants.as_slice() {
            [a, b] if self.peer_to_peer => Some(pair_key(*a, *b)),
            _ => None,
        }
    }
}

/// Order-independent key for an unordered pair of users.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Document,
    Image,
    Video,
    Audio,
    Location,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        use MessageKind::*;
        match self {
            Text => "text",
            Document => "document",
            Image => "image",
            Video => "video",
            Audio => "audio",
            Location => "location",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageKind {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        use MessageKind::*;
        Ok(match raw.as_str() {
            "text" => Text,
            "document" => Document,
            "image" => Image,
            "video" => Video,
            "audio" => Audio,
            "location" => Location,
            _ => return Err(format!("unknown message type {raw}")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Message {
    pub id: i64,
    pub room_id: Uuid,
    pub created_by: Uuid,
    pub content: String,
    #[sqlx(rename = "type", try_from = "String")]
    pub kind: MessageKind,
    pub created_at: OffsetDateTime,
    pub edited_at: Option<OffsetDateTime>,
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&db_pool).await?;
    Ok(db_pool)
}

/// Opens a write transaction that takes the write lock up front.
///
/// A deferred transaction that reads first cannot wait for the lock when it
/// later writes; SQLite fails it with `SQLITE_BUSY` straight away. Taking the
/// lock at `BEGIN` makes concurrent writers queue on the busy timeout instead.
pub async fn begin_write(db_pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    db_pool.begin_with("BEGIN IMMEDIATE").await
}

/// A private in-memory database on a single pinned connection.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&db_pool).await?;
    Ok(db_pool)
}
