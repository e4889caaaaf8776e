//! Message ingest pipeline: received → validated → persisted → dispatched.
//!
//! Validation failures abort before persistence with a typed error and no
//! partial state. Persistence is idempotent on external_id; a duplicate
//! submission yields `IngestOutcome::Duplicate` so the caller can skip
//! dispatch. Dispatch itself lives in `dispatch::fan_out`.

use uuid::Uuid;

use crate::directory::Message;
use crate::error::Error;
use crate::state::AppState;

/// Result of pushing one message event through the pipeline.
#[derive(Debug)]
pub enum IngestOutcome {
    /// A new row was created; dispatch should follow.
    Ingested(Message),
    /// A message with this external_id already exists. Not an error.
    Duplicate,
}

pub async fn ingest(
    state: &AppState,
    sender_id: i64,
    chat_id: i64,
    external_id: &str,
    text: &str,
) -> Result<IngestOutcome, Error> {
    // Validate
    if text.trim().is_empty() {
        return Err(Error::Validation("text must not be blank".into()));
    }
    if Uuid::parse_str(external_id).is_err() {
        return Err(Error::Validation("external_id must be a UUID".into()));
    }
    state
        .directory
        .get_chat(chat_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("chat {chat_id}")))?;
    state
        .directory
        .get_user(sender_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {sender_id}")))?;
    // Membership check goes through the presence cache: this runs on every
    // inbound message, so it must not cost a directory round-trip each time.
    if !state.cache.is_user_in_chat(chat_id, sender_id).await? {
        return Err(Error::Unauthorized { chat_id, user_id: sender_id });
    }

    // Persist
    match state
        .directory
        .insert_message_if_absent(external_id, chat_id, sender_id, text)
        .await?
    {
        Some(message) => Ok(IngestOutcome::Ingested(message)),
        None => Ok(IngestOutcome::Duplicate),
    }
}
