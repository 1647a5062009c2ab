//! Key-value primitives the service is built on.
//!
//! Each method maps onto one single-key Redis command and is atomic on its
//! own. Sequences of calls are not.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::{debug, error};

pub const CREDENTIALS_KEY: &str = "billbook:credentials";
pub const PROFILES_KEY: &str = "billbook:profiles";
const RECORDS_KEY_PREFIX: &str = "billbook:records";

/// One list per user; the credential and profile hashes are shared.
pub fn records_key(username: &str) -> String {
    format!("{RECORDS_KEY_PREFIX}:{username}")
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;
    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError>;
    /// Whole list, head to tail. A missing key is an empty list.
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, KvError>;
    /// Removes the first element equal to `value`; returns whether one was removed.
    async fn lrem_first(&self, key: &str, value: &str) -> Result<bool, KvError>;
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    pub async fn connect(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("parse redis url")?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .context("redis connect timed out")?
            .context("connect to redis")?;
        let store = Self { conn, timeout };
        store.ping().await.context("redis ping")?;
        Ok(store)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { redis::cmd("PING").query_async::<_, String>(&mut conn).await })
            .await
            .map(|_| ())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, KvError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        bounded(self.timeout, fut).await
    }
}

/// Runs one store call, turning an elapsed `limit` into [`KvError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, KvError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => {
            error!(error = %e, "redis command failed");
            Err(KvError::Backend(e.to_string()))
        }
        Err(_) => {
            error!(timeout = ?limit, "redis command timed out");
            Err(KvError::Timeout(limit))
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.hget::<_, _, Option<String>>(key, field).await })
            .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.hset::<_, _, _, ()>(key, field, value).await })
            .await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.rpush::<_, _, ()>(key, value).await })
            .await
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.lrange::<_, Vec<String>>(key, 0, -1).await })
            .await
    }

    async fn lrem_first(&self, key: &str, value: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let removed = self
            .bounded(async move { conn.lrem::<_, _, i64>(key, 1, value).await })
            .await?;
        debug!(key, removed, "lrem");
        Ok(removed > 0)
    }
}

/// In-process store with the same per-call semantics as [`RedisStore`].
#[derive(Default)]
pub struct MemoryStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<T>(_: T) -> KvError {
        KvError::Backend("memory store lock poisoned".into())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let hashes = self.hashes.lock().map_err(Self::poisoned)?;
        Ok(hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut hashes = self.hashes.lock().map_err(Self::poisoned)?;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut lists = self.lists.lock().map_err(Self::poisoned)?;
        lists.entry(key.to_string()).or_default().push(value.to_string());
        Ok(())
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, KvError> {
        let lists = self.lists.lock().map_err(Self::poisoned)?;
        Ok(lists.get(key).cloned().unwrap_or_default())
    }

    async fn lrem_first(&self, key: &str, value: &str) -> Result<bool, KvError> {
        let mut lists = self.lists.lock().map_err(Self::poisoned)?;
        let Some(list) = lists.get_mut(key) else {
            return Ok(false);
        };
        match list.iter().position(|v| v == value) {
            Some(pos) => {
                list.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
