//! Cache contract, configuration, and statistics.

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default entry lifetime in whole seconds; `0` means never expires.
    pub ttl_seconds: u64,
    /// Prefix isolating this cache's key space: physical keys are
    /// `namespace:key`.
    pub namespace: String,
    /// Entry cap for the in-process variant; ignored by networked backends.
    pub max_size: usize,
    pub enable_stats: bool,
    /// Connection string for networked backends.
    pub url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            namespace: "default".to_string(),
            max_size: 1000,
            enable_stats: false,
            url: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.enable_stats = enabled;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub(crate) fn physical_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Effective TTL for a write: explicit beats default, `0` means never.
    pub(crate) fn effective_ttl(&self, ttl: Option<u64>) -> Option<u64> {
        let secs = ttl.unwrap_or(self.ttl_seconds);
        if secs == 0 {
            None
        } else {
            Some(secs)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters shared by both cache variants; no-ops when disabled.
pub(crate) struct AtomicStats {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn set(&self) {
        if self.enabled {
            self.sets.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn delete(&self) {
        if self.enabled {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn error(&self) {
        if self.enabled {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Uniform contract across cache implementations.
///
/// `ttl` follows the config rules: `None` uses the configured default,
/// `Some(0)` never expires, any positive value is whole seconds from write
/// time. Batch outputs preserve input key order.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<bool>;
    async fn has(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn clear(&self) -> Result<bool>;

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<Value>>>;
    async fn set_many(&self, entries: &[(String, Value)], ttl: Option<u64>) -> Result<bool>;
    async fn delete_many(&self, keys: &[&str]) -> Result<usize>;

    fn stats(&self) -> CacheStats;
    fn reset_stats(&self);

    /// Idempotent teardown; releases any backing connection.
    async fn close(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.ttl_seconds, 300);
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.max_size, 1000);
        assert!(!cfg.enable_stats);
        assert!(cfg.url.is_none());
    }

    #[test]
    fn test_physical_key_namespacing() {
        let cfg = CacheConfig::new().with_namespace("seo");
        assert_eq!(cfg.physical_key("gen-abc"), "seo:gen-abc");
    }

    #[test]
    fn test_effective_ttl_rules() {
        let cfg = CacheConfig::new().with_ttl_seconds(60);
        assert_eq!(cfg.effective_ttl(None), Some(60));
        assert_eq!(cfg.effective_ttl(Some(5)), Some(5));
        assert_eq!(cfg.effective_ttl(Some(0)), None);
        assert_eq!(CacheConfig::new().with_ttl_seconds(0).effective_ttl(None), None);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = AtomicStats::new(true);
        stats.hit();
        stats.hit();
        stats.hit();
        stats.miss();
        assert!((stats.to_stats().hit_ratio() - 0.75).abs() < 1e-9);

        stats.reset();
        assert_eq!(stats.to_stats().hit_ratio(), 0.0);
    }

    #[test]
    fn test_disabled_stats_do_not_count() {
        let stats = AtomicStats::new(false);
        stats.hit();
        stats.set();
        stats.error();
        let snapshot = stats.to_stats();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.sets, 0);
        assert_eq!(snapshot.errors, 0);
    }
}
