pub mod migrations;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::directory::{Chat, Directory, Message, User};
use crate::error::Error;

/// Type alias for the shared database connection.
/// rusqlite is synchronous — we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("courier.db");
    let mut conn = Connection::open(&db_path)?;

    // WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let migrations = migrations::migrations();
    migrations.to_latest(&mut conn)?;

    tracing::info!("database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// SQLite-backed implementation of the `Directory` collaborator.
#[derive(Clone)]
pub struct SqliteDirectory {
    db: DbPool,
}

impl SqliteDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| Error::Storage("database lock poisoned".into()))?;
            f(&conn).map_err(|e| Error::Storage(e.to_string()))
        })
        .await
        .map_err(|e| Error::Storage(e.to_string()))?
    }

    // Seeding helpers used at bring-up and in tests. Full CRUD lives with
    // the surrounding application, not this crate.

    pub async fn create_user(&self, name: &str) -> Result<User, Error> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (name, created_at) VALUES (?1, ?2)",
                params![name, Utc::now().to_rfc3339()],
            )?;
            Ok(User {
                id: conn.last_insert_rowid(),
                name,
            })
        })
        .await
    }

    pub async fn create_chat(&self, name: &str, is_group: bool) -> Result<Chat, Error> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chats (name, is_group, created_at) VALUES (?1, ?2, ?3)",
                params![name, is_group, Utc::now().to_rfc3339()],
            )?;
            Ok(Chat {
                id: conn.last_insert_rowid(),
                name,
                is_group,
            })
        })
        .await
    }

    pub async fn add_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        let inserted = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                    params![chat_id, user_id],
                )
            })
            .await?;
        if inserted == 0 {
            return Err(Error::AlreadyExists(format!(
                "membership of user {user_id} in chat {chat_id}"
            )));
        }
        Ok(())
    }
}

/// Raw messages row; timestamp is parsed after the rusqlite closure so a
/// malformed value maps to a Storage error instead of a panic.
struct MessageRow {
    id: i64,
    external_id: String,
    chat_id: i64,
    sender_id: i64,
    text: String,
    timestamp: String,
    is_read: bool,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(MessageRow {
            id: row.get(0)?,
            external_id: row.get(1)?,
            chat_id: row.get(2)?,
            sender_id: row.get(3)?,
            text: row.get(4)?,
            timestamp: row.get(5)?,
            is_read: row.get(6)?,
        })
    }

    fn into_message(self) -> Result<Message, Error> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| Error::Storage(format!("bad timestamp in messages row: {e}")))?
            .with_timezone(&Utc);
        Ok(Message {
            id: self.id,
            external_id: self.external_id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            text: self.text,
            timestamp,
            is_read: self.is_read,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, external_id, chat_id, sender_id, text, timestamp, is_read";

#[async_trait]
impl Directory for SqliteDirectory {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, Error> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>, Error> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, is_group FROM chats WHERE id = ?1",
                params![chat_id],
                |row| {
                    Ok(Chat {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_group: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn get_chat_members(&self, chat_id: i64) -> Result<Vec<i64>, Error> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1")?;
            let members = stmt
                .query_map(params![chat_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(members)
        })
        .await
    }

    async fn is_user_in_chat(&self, chat_id: i64, user_id: i64) -> Result<bool, Error> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn insert_message_if_absent(
        &self,
        external_id: &str,
        chat_id: i64,
        sender_id: i64,
        text: &str,
    ) -> Result<Option<Message>, Error> {
        let external_id = external_id.to_string();
        let text = text.to_string();
        let row = self
            .with_conn(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO messages
                         (external_id, chat_id, sender_id, text, timestamp, is_read)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                    params![external_id, chat_id, sender_id, text, Utc::now().to_rfc3339()],
                )?;
                if inserted == 0 {
                    // Duplicate external_id: the existing row stands.
                    return Ok(None);
                }
                conn.query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE external_id = ?1"),
                    params![external_id],
                    MessageRow::from_row,
                )
                .map(Some)
            })
            .await?;
        row.map(MessageRow::into_message).transpose()
    }
}
