//! Distributed locks
//!
//! A lock is one atomic `SET key 1 NX PX ttl` against a shared store. The
//! lease is never renewed: a critical section outliving its TTL loses the
//! lock silently. Unlock is an unconditional delete.

use crate::config::RedisConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

/// Key-value store able to back a distributed lock
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` only if absent, expiring after `ttl`. True when the key was set.
    async fn set_nx_px(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key`; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Redis-backed lock store shared across processes
#[derive(Clone)]
pub struct RedisLockStore {
    redis: ConnectionManager,
}

impl RedisLockStore {
    /// Wrap an existing connection
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Connect using the runtime's `redis` section
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let redis = ConnectionManager::new(client).await?;

        info!("Redis lock store connected");
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_nx_px(&self, key: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.redis.clone())
            .await?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _: () = self.redis.clone().del(key).await?;
        Ok(())
    }
}

/// Process-local lock store, for tests and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    leases: Mutex<HashMap<String, Instant>>,
}

impl MemoryLockStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_nx_px(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        leases.retain(|_, expires| *expires > now);

        match leases.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.leases.lock().await.remove(key);
        Ok(())
    }
}

/// Lock key namespaced under the adapter name
pub fn namespaced(adapter: &str, key: &str) -> String {
    format!("{}:{}", adapter, key)
}

/// Error raised when `key` is already held
pub(crate) fn locked(adapter: &str, namespaced_key: &str) -> Error {
    Error::resource_locked(adapter, format!("key `{}` is locked", namespaced_key))
}
