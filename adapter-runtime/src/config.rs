//! Runtime configuration
//!
//! Settings shared by every adapter in a process: where the lock store lives,
//! how outbound connections are pooled and the default lock lease.

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Process-wide adapter runtime configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuntimeConfig {
    /// Lock store connection
    pub redis: RedisConfig,
    /// Outbound connection pooling
    pub http: HttpConfig,
    /// Lock defaults
    pub lock: LockConfig,
}

/// Redis connection settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    /// Connection URL (`redis://` or `rediss://`)
    pub url: String,
}

/// Connection pooling applied to adapters without an explicit agent
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Idle pooled connections are closed after this many seconds
    pub pool_idle_timeout_secs: u64,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
    /// TCP keepalive interval in seconds; 0 disables keepalive
    pub tcp_keepalive_secs: u64,
}

/// Lock defaults
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LockConfig {
    /// Lease used by `lock()` when no TTL is given
    pub default_ttl_ms: u64,
}

impl RuntimeConfig {
    /// Load from defaults, an optional config file and `ADAPTERS__*` variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("http.pool_idle_timeout_secs", 90)?
            .set_default("http.pool_max_idle_per_host", 32)?
            .set_default("http.tcp_keepalive_secs", 60)?
            .set_default("lock.default_ttl_ms", crate::DEFAULT_LOCK_TTL_MS)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("ADAPTERS").separator("__"));

        if let Ok(redis_url) = env::var("REDIS_URL") {
            builder = builder.set_override("redis.url", redis_url)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.url.is_empty() {
            return Err("Redis URL is required".to_string());
        }

        if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            return Err(format!("Redis URL must use redis:// or rediss://, got {}", self.redis.url));
        }

        if self.lock.default_ttl_ms == 0 {
            return Err("Lock TTL must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl HttpConfig {
    /// Idle timeout as a duration
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    /// Keepalive interval, `None` when disabled
    pub fn tcp_keepalive(&self) -> Option<Duration> {
        match self.tcp_keepalive_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            http: HttpConfig {
                pool_idle_timeout_secs: 90,
                pool_max_idle_per_host: 32,
                tcp_keepalive_secs: 60,
            },
            lock: LockConfig {
                default_ttl_ms: crate::DEFAULT_LOCK_TTL_MS,
            },
        }
    }
}
