//! Wire protocol for the real-time channel.
//!
//! Inbound events are JSON objects discriminated by an `action` field;
//! outbound frames are discriminated by `kind`. Event-level failures are
//! echoed back as an error frame and never close the connection.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory;
use crate::dispatch;
use crate::error::Error;
use crate::pipeline::{self, IngestOutcome};
use crate::state::AppState;
use crate::ws::ConnectionSender;

/// Events a client may send over its connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage {
        chat_id: i64,
        external_id: String,
        text: String,
    },
    GetChatMembers {
        chat_id: i64,
    },
}

/// Frames pushed to clients. `Message` is the fan-out payload; its shape is
/// the stable outbound format queued for offline recipients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerEvent {
    Message {
        chat_id: i64,
        sender_id: i64,
        text: String,
        timestamp: DateTime<Utc>,
        is_read: bool,
    },
    ChatMembers {
        chat_id: i64,
        members: Vec<i64>,
    },
    Error {
        code: u16,
        message: String,
    },
}

impl From<&directory::Message> for ServerEvent {
    fn from(message: &directory::Message) -> Self {
        ServerEvent::Message {
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            text: message.text.clone(),
            timestamp: message.timestamp,
            is_read: message.is_read,
        }
    }
}

/// Handle one inbound text frame: parse, dispatch, report failures as an
/// error frame.
pub async fn handle_event(raw: &str, tx: &ConnectionSender, state: &AppState, user_id: i64) {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(user_id, error = %e, "malformed client event");
            send_error(tx, &Error::Validation(e.to_string()));
            return;
        }
    };

    let result = match event {
        ClientEvent::SendMessage {
            chat_id,
            external_id,
            text,
        } => handle_send_message(state, user_id, chat_id, &external_id, &text).await,
        ClientEvent::GetChatMembers { chat_id } => {
            handle_get_chat_members(tx, state, user_id, chat_id).await
        }
    };

    if let Err(e) = result {
        tracing::debug!(user_id, error = %e, "event rejected");
        send_error(tx, &e);
    }
}

async fn handle_send_message(
    state: &AppState,
    sender_id: i64,
    chat_id: i64,
    external_id: &str,
    text: &str,
) -> Result<(), Error> {
    match pipeline::ingest(state, sender_id, chat_id, external_id, text).await? {
        IngestOutcome::Ingested(message) => {
            let frame = serde_json::to_string(&ServerEvent::from(&message))
                .map_err(|e| Error::Storage(e.to_string()))?;
            dispatch::fan_out(state, chat_id, sender_id, &frame).await;
            Ok(())
        }
        IngestOutcome::Duplicate => {
            // Retried submission: the message already exists, nothing to
            // dispatch again.
            tracing::debug!(sender_id, chat_id, external_id, "duplicate message ignored");
            Ok(())
        }
    }
}

async fn handle_get_chat_members(
    tx: &ConnectionSender,
    state: &AppState,
    user_id: i64,
    chat_id: i64,
) -> Result<(), Error> {
    if !state.cache.is_user_in_chat(chat_id, user_id).await? {
        return Err(Error::Unauthorized { chat_id, user_id });
    }
    let mut members: Vec<i64> = state
        .cache
        .get_chat_members(chat_id)
        .await?
        .into_iter()
        .collect();
    members.sort_unstable();
    send_event(tx, &ServerEvent::ChatMembers { chat_id, members });
    Ok(())
}

/// Serialize and push a frame to one connection.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json.into()));
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize server event"),
    }
}

fn send_error(tx: &ConnectionSender, error: &Error) {
    send_event(
        tx,
        &ServerEvent::Error {
            code: error.code(),
            message: error.to_string(),
        },
    );
}
