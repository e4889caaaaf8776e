//! Shared test fixtures: in-memory Directory and PresenceStore fakes plus
//! a helper that boots the server on an ephemeral port.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpListener;

use courier_server::cache::{PresenceCache, PresenceStore};
use courier_server::directory::{Chat, Directory, Message, User};
use courier_server::error::Error;
use courier_server::routes;
use courier_server::state::AppState;
use courier_server::ws::ConnectionRegistry;

/// In-memory authoritative store. Counts member-list lookups so tests can
/// assert the cache's single-fetch-per-TTL-window behavior.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<i64, User>>,
    chats: Mutex<HashMap<i64, Chat>>,
    members: Mutex<HashMap<i64, Vec<i64>>>,
    messages: Mutex<HashMap<String, Message>>,
    next_message_id: AtomicI64,
    pub member_lookups: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn add_user(&self, id: i64, name: &str) {
        self.users.lock().unwrap().insert(
            id,
            User {
                id,
                name: name.to_string(),
            },
        );
    }

    pub fn add_chat(&self, id: i64, name: &str, members: &[i64]) {
        self.chats.lock().unwrap().insert(
            id,
            Chat {
                id,
                name: name.to_string(),
                is_group: members.len() > 2,
            },
        );
        self.members.lock().unwrap().insert(id, members.to_vec());
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn member_lookup_count(&self) -> usize {
        self.member_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, Error> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>, Error> {
        Ok(self.chats.lock().unwrap().get(&chat_id).cloned())
    }

    async fn get_chat_members(&self, chat_id: i64) -> Result<Vec<i64>, Error> {
        self.member_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_user_in_chat(&self, chat_id: i64, user_id: i64) -> Result<bool, Error> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(&chat_id)
            .map(|m| m.contains(&user_id))
            .unwrap_or(false))
    }

    async fn insert_message_if_absent(
        &self,
        external_id: &str,
        chat_id: i64,
        sender_id: i64,
        text: &str,
    ) -> Result<Option<Message>, Error> {
        let mut messages = self.messages.lock().unwrap();
        if messages.contains_key(external_id) {
            return Ok(None);
        }
        let message = Message {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            external_id: external_id.to_string(),
            chat_id,
            sender_id,
            text: text.to_string(),
            timestamp: Utc::now(),
            is_read: false,
        };
        messages.insert(external_id.to_string(), message.clone());
        Ok(Some(message))
    }
}

/// In-memory presence store with the same entry-absent-vs-empty semantics
/// as the Redis implementation. TTLs are accepted and ignored.
#[derive(Default)]
pub struct MemoryPresenceStore {
    members: Mutex<HashMap<i64, HashSet<i64>>>,
    queues: Mutex<HashMap<i64, Vec<String>>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self, user_id: i64) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn chat_members(&self, chat_id: i64) -> Result<Option<Vec<i64>>, Error> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(&chat_id)
            .map(|set| set.iter().copied().collect()))
    }

    async fn seed_chat_members(
        &self,
        chat_id: i64,
        members: &[i64],
        _ttl: Duration,
    ) -> Result<(), Error> {
        if members.is_empty() {
            return Ok(());
        }
        self.members
            .lock()
            .unwrap()
            .insert(chat_id, members.iter().copied().collect());
        Ok(())
    }

    async fn add_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        self.members
            .lock()
            .unwrap()
            .entry(chat_id)
            .or_default()
            .insert(user_id);
        Ok(())
    }

    async fn remove_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        if let Some(set) = self.members.lock().unwrap().get_mut(&chat_id) {
            set.remove(&user_id);
        }
        Ok(())
    }

    async fn invalidate_chat(&self, chat_id: i64) -> Result<(), Error> {
        self.members.lock().unwrap().remove(&chat_id);
        Ok(())
    }

    async fn push_pending(
        &self,
        user_id: i64,
        payload: &str,
        _ttl: Duration,
    ) -> Result<(), Error> {
        self.queues
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .push(payload.to_string());
        Ok(())
    }

    async fn drain_pending(&self, user_id: i64) -> Result<Vec<String>, Error> {
        Ok(self
            .queues
            .lock()
            .unwrap()
            .remove(&user_id)
            .unwrap_or_default())
    }
}

/// Build an AppState over the in-memory fakes.
pub fn build_state(
    directory: Arc<MemoryDirectory>,
    store: Arc<MemoryPresenceStore>,
) -> AppState {
    let cache = Arc::new(PresenceCache::new(
        store,
        directory.clone(),
        Duration::from_secs(86_400),
    ));
    AppState {
        directory,
        cache,
        connections: ConnectionRegistry::new(),
    }
}

/// Bind the router to an ephemeral port and serve it in the background.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
