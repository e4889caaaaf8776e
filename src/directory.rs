//! Authoritative data collaborator consumed by the real-time core.
//!
//! The core never touches tables directly; it goes through this trait so
//! the delivery pipeline can be exercised against an in-memory fake in
//! tests while production uses the SQLite implementation in `db`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;

/// User record as the core sees it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// Chat record. `is_group` distinguishes personal from group chats.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: i64,
    pub name: String,
    pub is_group: bool,
}

/// Persisted message. Immutable after creation except `is_read`.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub external_id: String,
    pub chat_id: i64,
    pub sender_id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Authoritative store interface: user/chat lookups, membership checks,
/// and idempotent message creation.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, Error>;

    async fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>, Error>;

    /// Full member list for a chat, from the source of truth.
    async fn get_chat_members(&self, chat_id: i64) -> Result<Vec<i64>, Error>;

    async fn is_user_in_chat(&self, chat_id: i64, user_id: i64) -> Result<bool, Error>;

    /// Insert keyed by `external_id`. Returns `None` when a message with
    /// that external_id already exists (duplicate submission); never
    /// creates a second row.
    async fn insert_message_if_absent(
        &self,
        external_id: &str,
        chat_id: i64,
        sender_id: i64,
        text: &str,
    ) -> Result<Option<Message>, Error>;
}
