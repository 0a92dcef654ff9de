//! Networked cache backed by a Redis-protocol key-value store.

use super::store::{AtomicStats, CacheConfig, CacheStats, ContentCache};
use crate::{Error, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_URL: &str = "redis://127.0.0.1:6379";
const SCAN_BATCH: usize = 100;

/// Networked [`ContentCache`] with server-side expiry.
///
/// A single multiplexed connection is shared by all operations and
/// established lazily on first use, exactly once. Connection establishment
/// failure surfaces [`Error::CacheUnreachable`]; any later per-operation
/// failure degrades to a miss/negative result so a flaky backing store can
/// never break the caller's path. Values travel as JSON text on the wire.
pub struct RedisCache {
    cfg: CacheConfig,
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    closed: AtomicBool,
    stats: AtomicStats,
}

impl RedisCache {
    pub fn new(cfg: CacheConfig) -> Result<Self> {
        let url = cfg.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string());
        let client = redis::Client::open(url.as_str()).map_err(|e| Error::CacheUnreachable {
            message: format!("invalid connection url '{}': {}", url, e),
        })?;
        let stats = AtomicStats::new(cfg.enable_stats);
        Ok(Self {
            cfg,
            client,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
            stats,
        })
    }

    /// Shared connection, established on first use. The slot mutex
    /// serializes establishment so concurrent first operations connect once.
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::CacheUnreachable {
                message: e.to_string(),
            })?;
        debug!(namespace = self.cfg.namespace.as_str(), "redis connection established");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn degrade(&self, op: &'static str, err: &redis::RedisError) {
        self.stats.error();
        warn!(op, error = %err, "redis operation failed, degrading to miss");
    }
}

#[async_trait]
impl ContentCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.is_closed() {
            return Ok(None);
        }
        let mut conn = self.connection().await?;
        let physical = self.cfg.physical_key(key);
        let text: Option<String> = match conn.get(&physical).await {
            Ok(text) => text,
            Err(e) => {
                self.degrade("get", &e);
                return Ok(None);
            }
        };
        match text {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => {
                    self.stats.hit();
                    Ok(Some(value))
                }
                Err(e) => {
                    self.stats.error();
                    warn!(key = physical.as_str(), error = %e, "undecodable cache entry ignored");
                    Ok(None)
                }
            },
            None => {
                self.stats.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let mut conn = self.connection().await?;
        let physical = self.cfg.physical_key(key);
        let text = serde_json::to_string(&value)?;
        let outcome: redis::RedisResult<()> = match self.cfg.effective_ttl(ttl) {
            Some(secs) => conn.set_ex(&physical, text, secs).await,
            None => conn.set(&physical, text).await,
        };
        match outcome {
            Ok(()) => {
                self.stats.set();
                Ok(true)
            }
            Err(e) => {
                self.degrade("set", &e);
                Ok(false)
            }
        }
    }

    async fn has(&self, key: &str) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let mut conn = self.connection().await?;
        let physical = self.cfg.physical_key(key);
        match conn.exists(&physical).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                self.degrade("has", &e);
                Ok(false)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let mut conn = self.connection().await?;
        let physical = self.cfg.physical_key(key);
        let removed: usize = match conn.del(&physical).await {
            Ok(n) => n,
            Err(e) => {
                self.degrade("delete", &e);
                return Ok(false);
            }
        };
        if removed > 0 {
            self.stats.delete();
        }
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let mut conn = self.connection().await?;
        let pattern = format!("{}:*", self.cfg.namespace);
        let mut cursor: u64 = 0;
        loop {
            let scanned: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let (next, keys) = match scanned {
                Ok(pair) => pair,
                Err(e) => {
                    self.degrade("clear", &e);
                    return Ok(false);
                }
            };
            if !keys.is_empty() {
                if let Err(e) = conn.del::<_, usize>(keys).await {
                    self.degrade("clear", &e);
                    return Ok(false);
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(true)
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<Value>>> {
        if keys.is_empty() || self.is_closed() {
            return Ok(vec![None; keys.len()]);
        }
        let mut conn = self.connection().await?;
        let physical: Vec<String> = keys.iter().map(|k| self.cfg.physical_key(k)).collect();
        // Single MGET round trip; reply order mirrors the request order.
        let texts: Vec<Option<String>> = match conn.mget(&physical).await {
            Ok(texts) => texts,
            Err(e) => {
                self.degrade("get_many", &e);
                return Ok(vec![None; keys.len()]);
            }
        };
        Ok(texts
            .into_iter()
            .map(|text| {
                let value = text.and_then(|t| serde_json::from_str(&t).ok());
                match value {
                    Some(v) => {
                        self.stats.hit();
                        Some(v)
                    }
                    None => {
                        self.stats.miss();
                        None
                    }
                }
            })
            .collect())
    }

    async fn set_many(&self, entries: &[(String, Value)], ttl: Option<u64>) -> Result<bool> {
        if entries.is_empty() {
            return Ok(true);
        }
        if self.is_closed() {
            return Ok(false);
        }
        let mut conn = self.connection().await?;
        let effective_ttl = self.cfg.effective_ttl(ttl);
        // One pipelined round trip for the whole batch.
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            let physical = self.cfg.physical_key(key);
            let text = serde_json::to_string(value)?;
            match effective_ttl {
                Some(secs) => pipe.set_ex(physical, text, secs).ignore(),
                None => pipe.set(physical, text).ignore(),
            };
        }
        match pipe.query_async::<_, ()>(&mut conn).await {
            Ok(()) => {
                for _ in entries {
                    self.stats.set();
                }
                Ok(true)
            }
            Err(e) => {
                self.degrade("set_many", &e);
                Ok(false)
            }
        }
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() || self.is_closed() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let physical: Vec<String> = keys.iter().map(|k| self.cfg.physical_key(k)).collect();
        match conn.del(physical).await {
            Ok(removed) => {
                for _ in 0..removed {
                    self.stats.delete();
                }
                Ok(removed)
            }
            Err(e) => {
                self.degrade("delete_many", &e);
                Ok(0)
            }
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the multiplexed handle releases the underlying socket.
        self.conn.lock().await.take();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
