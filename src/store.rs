use futures_util::{future::BoxFuture, FutureExt};
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::SyncError,
    model::{Message, MessageStatus, NewMessage, Room, User},
};

/// Result of a persist call. `fresh` is false when the submission was a
/// replay of an already stored `(sender, localId)` pair.
#[derive(Debug, Clone)]
pub struct Persisted {
    pub message: Message,
    pub fresh: bool,
}

/// Durable record keeper. The only writer of canonical ids.
pub trait MessageStore: Send + Sync + 'static {
    /// Stores a message, minting its canonical id and `createdAt`. When the
    /// message carries a `local_id` already stored for the same sender, the
    /// existing record is returned instead.
    fn persist(&self, message: NewMessage) -> BoxFuture<'_, Result<Persisted, SyncError>>;

    fn message<'a>(&'a self, canonical_id: &'a str) -> BoxFuture<'a, Result<Option<Message>, SyncError>>;

    /// Messages of a room, oldest first.
    fn room_messages<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, Result<Vec<Message>, SyncError>>;

    /// Moves the stored status forward. Returns false if it was already at or past `status`.
    fn update_status<'a>(
        &'a self,
        canonical_id: &'a str,
        status: MessageStatus,
    ) -> BoxFuture<'a, Result<bool, SyncError>>;

    fn room<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, Result<Option<Room>, SyncError>>;

    fn user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<User>, SyncError>>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        password_hash TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        local_id TEXT,
        room_id TEXT NOT NULL REFERENCES rooms(id),
        sender_id TEXT NOT NULL REFERENCES users(id),
        sender_display_name TEXT NOT NULL,
        body TEXT NOT NULL,
        replied_to_id TEXT,
        created_at TEXT NOT NULL,
        status INTEGER NOT NULL
    )",
    // NULL local ids never collide in sqlite, so only keyed submissions dedupe.
    "CREATE UNIQUE INDEX IF NOT EXISTS messages_sender_local ON messages (sender_id, local_id)",
    "CREATE INDEX IF NOT EXISTS messages_room_created ON messages (room_id, created_at)",
];

const MESSAGE_COLUMNS: &str =
    "id,local_id,room_id,sender_id,sender_display_name,body,replied_to_id,created_at,status";

type MessageRow = (
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    Option<String>,
    OffsetDateTime,
    i64,
);

fn message_from_row(
    (id, local_id, room_id, sender_id, sender_display_name, body, replied_to_id, created_at, status): MessageRow,
) -> Result<Message, SyncError> {
    let status = MessageStatus::from_rank(status)
        .ok_or_else(|| SyncError::PersistenceFailure(format!("message {id} has unknown status {status}")))?;

    Ok(Message {
        canonical_id: Some(id),
        local_id,
        room_id,
        sender_id,
        sender_display_name,
        body,
        replied_to_id,
        created_at,
        status,
    })
}

fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// SQLite-backed store. Also owns the room and user records.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// A private in-memory database. A single never-recycled connection keeps
    /// the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), SyncError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn create_room(&self, name: &str) -> Result<Room, SyncError> {
        let room = Room {
            room_id: Uuid::now_v7().to_string(),
            name: name.to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };
        sqlx::query("INSERT INTO rooms (id,name,created_at) VALUES (?,?,?)")
            .bind(&room.room_id)
            .bind(&room.name)
            .bind(room.created_at)
            .execute(&self.pool)
            .await?;
        Ok(room)
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, SyncError> {
        let rows: Vec<(String, String, OffsetDateTime)> =
            sqlx::query_as("SELECT id,name,created_at FROM rooms ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(room_id, name, created_at)| Room { room_id, name, created_at })
            .collect())
    }

    pub async fn create_user(&self, username: &str, password: &str, display_name: &str) -> Result<User, SyncError> {
        let user = User {
            user_id: Uuid::now_v7().to_string(),
            username: username.to_owned(),
            display_name: display_name.to_owned(),
        };
        sqlx::query("INSERT INTO users (id,username,display_name,password_hash) VALUES (?,?,?,?)")
            .bind(&user.user_id)
            .bind(&user.username)
            .bind(&user.display_name)
            .bind(hash_password(password))
            .execute(&self.pool)
            .await?;
        Ok(user)
    }

    /// Creates the user unless the username is taken. Returns the stored user either way.
    pub async fn ensure_user(&self, username: &str, password: &str, display_name: &str) -> Result<User, SyncError> {
        let existing: Option<(String, String, String)> =
            sqlx::query_as("SELECT id,username,display_name FROM users WHERE username=?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        match existing {
            Some((user_id, username, display_name)) => Ok(User { user_id, username, display_name }),
            None => self.create_user(username, password, display_name).await,
        }
    }

    /// The opaque credential check: a user identity, or `None`.
    pub async fn verify_credentials(&self, username: &str, password: &str) -> Result<Option<User>, SyncError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT id,username,display_name FROM users WHERE username=? AND password_hash=?",
        )
        .bind(username)
        .bind(hash_password(password))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, username, display_name)| User { user_id, username, display_name }))
    }

    async fn message_by_local_id(&self, sender_id: &str, local_id: &str) -> Result<Option<Message>, SyncError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id=? AND local_id=?"
        ))
        .bind(sender_id)
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(message_from_row).transpose()
    }
}

impl MessageStore for SqliteStore {
    fn persist(&self, new: NewMessage) -> BoxFuture<'_, Result<Persisted, SyncError>> {
        async move {
            let message = Message {
                canonical_id: Some(Uuid::now_v7().to_string()),
                local_id: new.local_id,
                room_id: new.room_id,
                sender_id: new.sender_id,
                sender_display_name: new.sender_display_name,
                body: new.body,
                replied_to_id: new.replied_to_id,
                created_at: OffsetDateTime::now_utc(),
                status: MessageStatus::Sent,
            };

            let rank = MessageStatus::Sent.rank().map(i64::from);
            let result = sqlx::query(&format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?)"
            ))
            .bind(&message.canonical_id)
            .bind(&message.local_id)
            .bind(&message.room_id)
            .bind(&message.sender_id)
            .bind(&message.sender_display_name)
            .bind(&message.body)
            .bind(&message.replied_to_id)
            .bind(message.created_at)
            .bind(rank)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(Persisted { message, fresh: true }),
                Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                    let local_id = message.local_id.as_deref().unwrap_or_default();
                    let existing = self
                        .message_by_local_id(&message.sender_id, local_id)
                        .await?
                        .ok_or_else(|| {
                            SyncError::PersistenceFailure(format!("duplicate local id {local_id} vanished"))
                        })?;
                    Ok(Persisted { message: existing, fresh: false })
                }
                Err(err) => Err(err.into()),
            }
        }
        .boxed()
    }

    fn message<'a>(&'a self, canonical_id: &'a str) -> BoxFuture<'a, Result<Option<Message>, SyncError>> {
        async move {
            let row: Option<MessageRow> =
                sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id=?"))
                    .bind(canonical_id)
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(message_from_row).transpose()
        }
        .boxed()
    }

    fn room_messages<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, Result<Vec<Message>, SyncError>> {
        async move {
            let rows: Vec<MessageRow> = sqlx::query_as(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id=? ORDER BY created_at, id"
            ))
            .bind(room_id)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(message_from_row).collect()
        }
        .boxed()
    }

    fn update_status<'a>(
        &'a self,
        canonical_id: &'a str,
        status: MessageStatus,
    ) -> BoxFuture<'a, Result<bool, SyncError>> {
        async move {
            let Some(rank) = status.rank() else {
                return Err(SyncError::invalid(format!("{status} is not a delivery status")));
            };
            let result = sqlx::query("UPDATE messages SET status=?1 WHERE id=?2 AND status<?1")
                .bind(i64::from(rank))
                .bind(canonical_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
        .boxed()
    }

    fn room<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, Result<Option<Room>, SyncError>> {
        async move {
            let row: Option<(String, String, OffsetDateTime)> =
                sqlx::query_as("SELECT id,name,created_at FROM rooms WHERE id=?")
                    .bind(room_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|(room_id, name, created_at)| Room { room_id, name, created_at }))
        }
        .boxed()
    }

    fn user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<User>, SyncError>> {
        async move {
            let row: Option<(String, String, String)> =
                sqlx::query_as("SELECT id,username,display_name FROM users WHERE id=?")
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|(user_id, username, display_name)| User { user_id, username, display_name }))
        }
        .boxed()
    }
}
