//! TTL key-value cache contract.
//!
//! Orchestration helpers use the cache on a best-effort basis: a failed write
//! never fails the operation that produced the value.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use tracing::debug;

use crate::{OrcaError, Result};

#[async_trait]
pub trait Cache: Send + Sync {
    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()>;

    /// Fetch a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

struct CachedValue {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Process-local cache, used by tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CachedValue>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries. Reads already ignore them; this reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CachedValue {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                debug!(key = %key, "Cache entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Redis-backed cache using a multiplexed connection manager.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| OrcaError::Cache(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| OrcaError::Cache(e.to_string()))?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()> {
        let body = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.full_key(key), body, ttl.as_secs().max(1))
            .await
            .map_err(|e| OrcaError::Cache(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.full_key(key))
            .await
            .map_err(|e| OrcaError::Cache(e.to_string()))?;
        match raw {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }
}
