//! Connection registry: live WebSocket connections keyed by user id.
//!
//! DashMap gives single-key atomicity without a global lock. Exactly one
//! connection per user: a reconnect supersedes the previous entry and the
//! superseded channel is sent an explicit Close frame rather than being
//! silently orphaned. Each entry carries a connection id so that a
//! superseded actor's cleanup cannot evict its replacement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Sender half of a connection's writer channel. Cloning this lets any part
/// of the system push frames to that client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Close code sent to a connection replaced by a newer one for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;

/// Outcome of an atomic send-or-miss delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Offline,
}

struct ConnectionHandle {
    id: u64,
    sender: ConnectionSender,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<i64, ConnectionHandle>>,
    next_id: Arc<AtomicU64>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a connection for a user, superseding any previous one.
    /// Returns the connection id the caller must pass to `unregister`.
    pub fn register(&self, user_id: i64, sender: ConnectionSender) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.insert(user_id, ConnectionHandle { id, sender });

        if let Some(old) = previous {
            tracing::debug!(user_id, "superseding existing connection");
            let _ = old.sender.send(Message::Close(Some(CloseFrame {
                code: CLOSE_SUPERSEDED,
                reason: "superseded by a newer connection".into(),
            })));
        }

        id
    }

    /// Remove the user's entry, but only if it still belongs to `conn_id`.
    /// Idempotent; a superseded connection's cleanup is a no-op.
    pub fn unregister(&self, user_id: i64, conn_id: u64) {
        self.inner.remove_if(&user_id, |_, handle| handle.id == conn_id);
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.inner.contains_key(&user_id)
    }

    /// Atomic lookup-and-send. A send failure means the writer task is gone;
    /// the stale entry is removed and `Offline` is reported so the caller's
    /// enqueue fallback runs instead of the message being dropped.
    pub fn deliver(&self, user_id: i64, text: &str) -> Delivery {
        let stale = {
            let Some(handle) = self.inner.get(&user_id) else {
                return Delivery::Offline;
            };
            if handle
                .sender
                .send(Message::Text(text.to_string().into()))
                .is_ok()
            {
                return Delivery::Sent;
            }
            handle.id
        };
        self.inner.remove_if(&user_id, |_, handle| handle.id == stale);
        Delivery::Offline
    }

    /// Write a payload to the user's channel if registered.
    pub fn send(&self, user_id: i64, text: &str) -> bool {
        self.deliver(user_id, text) == Delivery::Sent
    }
}
