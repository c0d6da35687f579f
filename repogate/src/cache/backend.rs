//! Key-value backends for [`CacheStore`](super::CacheStore).
//!
//! Values and hash fields are plain strings at this level; encoding is the store's concern.

use super::errors::{CacheError, Result};
use crate::types::mask_url;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite `key`. `None` means the entry never expires.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn ping(&self) -> Result<()>;
}

/// Redis, through a multiplexed connection that reconnects on its own
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    #[instrument(skip_all, fields(url = %mask_url(url)), err)]
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        let backend = Self { manager };
        backend.ping().await?;
        info!("Connected to cache at {}", mask_url(url));
        Ok(backend)
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            // SET EX rejects 0, so sub-second expiries round up
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                let _: () = conn.set_ex(key, value, secs).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply '{pong}'")))
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Value { value: String, expires_at: Option<Instant> },
    Hash(HashMap<String, String>),
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Entry::Value { expires_at: Some(at), .. } if *at <= now)
    }
}

/// In-process backend used by tests and by cache-less local development
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str) -> CacheError {
        CacheError::Backend(format!("WRONGTYPE key '{key}' holds a different kind of value"))
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        // Expired entries are removed lazily on read
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        match self.entries.get(key).as_deref() {
            None => Ok(None),
            Some(Entry::Value { value, .. }) => Ok(Some(value.clone())),
            Some(Entry::Hash(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), Entry::Value { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<()> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry.value_mut() {
            Entry::Hash(fields) => {
                fields.insert(field.to_string(), value);
                Ok(())
            }
            Entry::Value { .. } => Err(Self::wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.entries.get(key).as_deref() {
            None => Ok(None),
            Some(Entry::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Entry::Value { .. }) => Err(Self::wrong_type(key)),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.entries.get(key).as_deref() {
            None => Ok(HashMap::new()),
            Some(Entry::Hash(fields)) => Ok(fields.clone()),
            Some(Entry::Value { .. }) => Err(Self::wrong_type(key)),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
