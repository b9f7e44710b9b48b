//! Redis Backend
//!
//! Distributed tier backed by a Redis-compatible server through a
//! multiplexed, auto-reconnecting `ConnectionManager`.
//!
//! | Operation      | Commands                      |
//! |----------------|-------------------------------|
//! | get / set      | `GET`, `SET .. PX`            |
//! | set_pair       | `MULTI`, 2x `SET .. PX`       |
//! | increment      | `INCR`                        |
//! | add_to_set     | `MULTI`, `SADD`, `PEXPIRE`    |
//! | is_member      | `SISMEMBER`                   |
//! | members        | `SMEMBERS`                    |
//! | exists / ttl   | `EXISTS`, `PTTL`              |

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use super::distributed::{DistributedBackend, KeyWrite};
use crate::error::{Error, Result};

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Redis-backed distributed store
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

/// Millisecond TTL for `PX`/`PEXPIRE`; sub-millisecond TTLs round up
fn ttl_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_millis().min(u64::MAX as u128) as u64;
    if millis == 0 && !ttl.is_zero() {
        1
    } else {
        millis
    }
}

impl RedisBackend {
    /// Connect to the configured server
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Config(format!("invalid Redis URL {}: {}", config.url, e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::backend("connect", config.url.as_str(), e))?;

        info!(url = %config.url, "Connected to Redis");
        Ok(Self { conn })
    }

    /// Round-trip `PING`
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("ping", "", e))?;
        Ok(())
    }
}

#[async_trait]
impl DistributedBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("get", key, e))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("set", key, e))?;
        Ok(())
    }

    async fn set_pair(&self, first: KeyWrite, second: KeyWrite) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&first.key)
            .arg(first.value)
            .arg("PX")
            .arg(ttl_millis(first.ttl))
            .ignore()
            .cmd("SET")
            .arg(&second.key)
            .arg(second.value)
            .arg("PX")
            .arg(ttl_millis(second.ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("set_pair", format!("{}, {}", first.key, second.key), e))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("remove", key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("exists", key, e))
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("time_to_live", key, e))?;
        // -2: absent, -1: no expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("increment", key, e))
    }

    async fn add_to_set(&self, key: &str, member: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(key)
            .arg(member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("add_to_set", key, e))?;
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("is_member", key, e))
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("members", key, e))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
