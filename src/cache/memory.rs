//! Process-local cache with bounded size and least-recently-used eviction.

use super::store::{AtomicStats, CacheConfig, CacheStats, ContentCache};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
    /// Monotonically increasing counter; smallest value is evicted first.
    access: u64,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() > at).unwrap_or(false)
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    access_counter: u64,
    closed: bool,
}

/// In-process [`ContentCache`] backed by an associative map.
///
/// Expiry is lazy: a stale entry is evicted the moment it is observed, never
/// swept proactively. Reads and writes of a live entry bump its access
/// counter; insertion at capacity evicts the entry with the smallest counter.
pub struct MemoryCache {
    cfg: CacheConfig,
    inner: RwLock<Inner>,
    stats: AtomicStats,
}

impl MemoryCache {
    pub fn new(cfg: CacheConfig) -> Self {
        let stats = AtomicStats::new(cfg.enable_stats);
        Self {
            cfg,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                access_counter: 0,
                closed: false,
            }),
            stats,
        }
    }

    /// Live entries currently held (expired-but-unobserved entries count).
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expires_at(&self, ttl: Option<u64>) -> Option<Instant> {
        self.cfg
            .effective_ttl(ttl)
            .map(|secs| Instant::now() + Duration::from_secs(secs))
    }

    fn evict_lru(inner: &mut Inner) {
        // Ties cannot occur (each touch assigns a fresh counter value); key
        // order keeps eviction stable regardless.
        let victim = inner
            .entries
            .iter()
            .min_by_key(|(k, e)| (e.access, (*k).clone()))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            debug!(key = key.as_str(), "evicting least-recently-used entry");
            inner.entries.remove(&key);
        }
    }

    fn insert_locked(&self, inner: &mut Inner, physical: String, value: Value, ttl: Option<u64>) {
        if !inner.entries.contains_key(&physical) && inner.entries.len() >= self.cfg.max_size {
            Self::evict_lru(inner);
        }
        inner.access_counter += 1;
        let entry = Entry {
            value,
            expires_at: self.expires_at(ttl),
            access: inner.access_counter,
        };
        inner.entries.insert(physical, entry);
    }

    /// Look up a live entry, evicting it if observed stale. Bumps the access
    /// counter on a hit.
    fn get_locked(&self, inner: &mut Inner, physical: &str) -> Option<Value> {
        match inner.entries.get(physical) {
            Some(entry) if entry.is_expired() => {
                inner.entries.remove(physical);
                None
            }
            Some(_) => {
                inner.access_counter += 1;
                let counter = inner.access_counter;
                let entry = inner.entries.get_mut(physical).expect("checked above");
                entry.access = counter;
                Some(entry.value.clone())
            }
            None => None,
        }
    }
}

#[async_trait]
impl ContentCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(None);
        }
        let physical = self.cfg.physical_key(key);
        match self.get_locked(&mut inner, &physical) {
            Some(value) => {
                self.stats.hit();
                Ok(Some(value))
            }
            None => {
                self.stats.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(false);
        }
        let physical = self.cfg.physical_key(key);
        self.insert_locked(&mut inner, physical, value, ttl);
        self.stats.set();
        Ok(true)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(false);
        }
        let physical = self.cfg.physical_key(key);
        match inner.entries.get(&physical) {
            Some(entry) if entry.is_expired() => {
                inner.entries.remove(&physical);
                Ok(false)
            }
            // An existence check is a read: it keeps the entry recently used.
            Some(_) => {
                inner.access_counter += 1;
                let counter = inner.access_counter;
                if let Some(entry) = inner.entries.get_mut(&physical) {
                    entry.access = counter;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(false);
        }
        let physical = self.cfg.physical_key(key);
        let removed = inner.entries.remove(&physical).is_some();
        if removed {
            self.stats.delete();
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(false);
        }
        inner.entries.clear();
        Ok(true)
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<Value>>> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(vec![None; keys.len()]);
        }
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let physical = self.cfg.physical_key(key);
            let value = self.get_locked(&mut inner, &physical);
            match value {
                Some(_) => self.stats.hit(),
                None => self.stats.miss(),
            }
            out.push(value);
        }
        Ok(out)
    }

    async fn set_many(&self, entries: &[(String, Value)], ttl: Option<u64>) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(false);
        }
        for (key, value) in entries {
            let physical = self.cfg.physical_key(key);
            self.insert_locked(&mut inner, physical, value.clone(), ttl);
            self.stats.set();
        }
        Ok(true)
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<usize> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Ok(0);
        }
        let mut removed = 0;
        for key in keys {
            let physical = self.cfg.physical_key(key);
            if inner.entries.remove(&physical).is_some() {
                self.stats.delete();
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.closed = true;
        inner.entries.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
