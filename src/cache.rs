//! Presence cache: chat-membership sets and pending-delivery queues.
//!
//! Backed by an external key-value store (Redis in production) so the
//! queues survive a process restart. Membership is seeded lazily from the
//! authoritative directory and served from the cache within a bounded TTL;
//! a user removed from a chat can therefore still receive up to TTL-old
//! cached delivery. Explicit invalidation hooks exist for callers that
//! mutate membership and want the cache coherent immediately.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

use crate::directory::Directory;
use crate::error::Error;

/// Default expiry for membership sets and pending queues: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// Key-value operations the cache needs from its backing store.
/// `RedisPresenceStore` is the production implementation; tests use an
/// in-memory fake.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Cached member set for a chat. `None` means no entry (expired or
    /// never seeded), which is distinct from an empty set.
    async fn chat_members(&self, chat_id: i64) -> Result<Option<Vec<i64>>, Error>;

    async fn seed_chat_members(
        &self,
        chat_id: i64,
        members: &[i64],
        ttl: Duration,
    ) -> Result<(), Error>;

    async fn add_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error>;

    async fn remove_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error>;

    async fn invalidate_chat(&self, chat_id: i64) -> Result<(), Error>;

    /// Append to the user's pending queue and refresh its TTL.
    async fn push_pending(&self, user_id: i64, payload: &str, ttl: Duration)
        -> Result<(), Error>;

    /// Atomically read and delete the user's pending queue, FIFO order.
    async fn drain_pending(&self, user_id: i64) -> Result<Vec<String>, Error>;
}

fn members_key(chat_id: i64) -> String {
    format!("chat:{chat_id}:members")
}

fn queue_key(user_id: i64) -> String {
    format!("queue:user:{user_id}")
}

/// Redis-backed presence store over a shared multiplexed connection.
pub struct RedisPresenceStore {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisPresenceStore {
    /// Open a connection to Redis and verify it with a PING.
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client =
            redis::Client::open(redis_url).map_err(|e| Error::Cache(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn chat_members(&self, chat_id: i64) -> Result<Option<Vec<i64>>, Error> {
        let mut conn = self.conn.lock().await;
        let key = members_key(chat_id);
        let exists: bool = redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        if !exists {
            return Ok(None);
        }
        let members: Vec<i64> = redis::cmd("SMEMBERS")
            .arg(&key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(Some(members))
    }

    async fn seed_chat_members(
        &self,
        chat_id: i64,
        members: &[i64],
        ttl: Duration,
    ) -> Result<(), Error> {
        // SADD needs at least one member; an empty chat is simply not
        // cached and falls through to the directory on every lookup.
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let key = members_key(chat_id);
        let mut cmd = redis::cmd("SADD");
        cmd.arg(&key);
        for member in members {
            cmd.arg(member);
        }
        cmd.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(ttl.as_secs())
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    async fn add_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SADD")
            .arg(members_key(chat_id))
            .arg(user_id)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    async fn remove_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SREM")
            .arg(members_key(chat_id))
            .arg(user_id)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    async fn invalidate_chat(&self, chat_id: i64) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        redis::cmd("DEL")
            .arg(members_key(chat_id))
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    async fn push_pending(
        &self,
        user_id: i64,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        let key = queue_key(user_id);
        redis::cmd("RPUSH")
            .arg(&key)
            .arg(payload)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(ttl.as_secs())
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    async fn drain_pending(&self, user_id: i64) -> Result<Vec<String>, Error> {
        let mut conn = self.conn.lock().await;
        let key = queue_key(user_id);
        // Read and delete in one transaction so a payload is flushed
        // exactly once even with concurrent drains.
        let (entries, _deleted): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(entries)
    }
}

/// Membership + queue cache over a `PresenceStore`, seeded from the
/// authoritative `Directory` on miss.
pub struct PresenceCache {
    store: Arc<dyn PresenceStore>,
    directory: Arc<dyn Directory>,
    ttl: Duration,
}

impl PresenceCache {
    pub fn new(store: Arc<dyn PresenceStore>, directory: Arc<dyn Directory>, ttl: Duration) -> Self {
        Self {
            store,
            directory,
            ttl,
        }
    }

    /// Member set for a chat. Cache hit within TTL costs no directory
    /// round-trip; a miss seeds the cache. If the store is unreachable the
    /// lookup degrades to a direct directory fetch.
    pub async fn get_chat_members(&self, chat_id: i64) -> Result<HashSet<i64>, Error> {
        match self.store.chat_members(chat_id).await {
            Ok(Some(members)) => return Ok(members.into_iter().collect()),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "presence store read failed, falling back to directory");
                let members = self.directory.get_chat_members(chat_id).await?;
                return Ok(members.into_iter().collect());
            }
        }

        let members = self.directory.get_chat_members(chat_id).await?;
        if let Err(e) = self.store.seed_chat_members(chat_id, &members, self.ttl).await {
            tracing::warn!(chat_id, error = %e, "failed to seed membership cache");
        }
        Ok(members.into_iter().collect())
    }

    /// Membership test with the same caching policy as `get_chat_members`.
    pub async fn is_user_in_chat(&self, chat_id: i64, user_id: i64) -> Result<bool, Error> {
        let members = self.get_chat_members(chat_id).await?;
        Ok(members.contains(&user_id))
    }

    /// Write-through invalidation hooks for membership changes.
    pub async fn add_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        self.store.add_chat_member(chat_id, user_id).await
    }

    pub async fn remove_member(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        self.store.remove_chat_member(chat_id, user_id).await
    }

    pub async fn invalidate_chat(&self, chat_id: i64) -> Result<(), Error> {
        self.store.invalidate_chat(chat_id).await
    }

    /// Append a serialized message to the user's pending queue.
    /// Every append refreshes the queue TTL.
    pub async fn queue_message(&self, user_id: i64, payload: &str) -> Result<(), Error> {
        self.store.push_pending(user_id, payload, self.ttl).await
    }

    /// Drain the user's pending queue in FIFO order.
    pub async fn drain_queue(&self, user_id: i64) -> Result<Vec<String>, Error> {
        self.store.drain_pending(user_id).await
    }
}
