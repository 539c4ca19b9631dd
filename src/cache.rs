//! Short-TTL read caches for menu, order history, and report data.
//!
//! Each entry persists as `{data, timestamp, ttl}` (milliseconds) under a
//! `cache:`-prefixed storage key and is considered expired once
//! `now - timestamp > ttl`. Reads of absent, corrupt, or expired entries
//! degrade to a miss. A failed write (typically storage quota) wipes every
//! cache entry and retries once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::storage::{StorageAdapter, CACHE_KEY_PREFIX};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: Value,
    /// Unix milliseconds at write time.
    timestamp: i64,
    /// Lifetime in milliseconds.
    ttl: i64,
}

pub struct TtlCache {
    storage: Arc<dyn StorageAdapter>,
}

impl TtlCache {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    fn storage_key(name: &str) -> String {
        format!("{CACHE_KEY_PREFIX}{name}")
    }

    /// Read a cached value; `None` on miss, corruption, or expiry.
    pub fn get(&self, name: &str) -> Option<Value> {
        let raw = self.storage.get(&Self::storage_key(name))?;
        let entry = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(name, error = %e, "cache: dropping corrupt entry");
                let _ = self.storage.remove(&Self::storage_key(name));
                return None;
            }
        };

        let age = chrono::Utc::now().timestamp_millis() - entry.timestamp;
        if age > entry.ttl {
            debug!(name, age_ms = age, ttl_ms = entry.ttl, "cache: entry expired");
            let _ = self.storage.remove(&Self::storage_key(name));
            return None;
        }
        Some(entry.data)
    }

    /// Store a value with the given lifetime. On a write failure every cache
    /// entry is wiped and the write retried once; a second failure is logged
    /// and swallowed.
    pub fn set(&self, name: &str, data: Value, ttl: Duration) {
        let entry = CacheEntry {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            ttl: ttl.as_millis() as i64,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(name, error = %e, "cache: failed to serialize entry");
                return;
            }
        };

        if let Err(first) = self.storage.set(&Self::storage_key(name), &raw) {
            warn!(name, error = %first, "cache: write failed, wiping cache and retrying once");
            self.clear();
            if let Err(second) = self.storage.set(&Self::storage_key(name), &raw) {
                warn!(name, error = %second, "cache: write failed after wipe, giving up");
            }
        }
    }

    /// Drop a single entry.
    pub fn invalidate(&self, name: &str) {
        let _ = self.storage.remove(&Self::storage_key(name));
    }

    /// Drop every entry whose name starts with `prefix` (writes to a
    /// resource invalidate all cached reads of it, whatever their query).
    pub fn invalidate_prefix(&self, prefix: &str) {
        let full = format!("{CACHE_KEY_PREFIX}{prefix}");
        for key in self.storage.keys() {
            if key.starts_with(&full) {
                let _ = self.storage.remove(&key);
            }
        }
    }

    /// Drop every cache entry (other storage keys are untouched).
    pub fn clear(&self) {
        for key in self.storage.keys() {
            if key.starts_with(CACHE_KEY_PREFIX) {
                let _ = self.storage.remove(&key);
            }
        }
    }
}

/// Stable cache name for a parameterized request path such as
/// `/Reports/revenue?from=...`. The digest keeps storage keys short and
/// free of separator characters.
pub fn request_fingerprint(path: &str) -> String {
    format!("{:x}", md5::compute(path.as_bytes()))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn cache_with_storage() -> (TtlCache, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (TtlCache::new(storage.clone()), storage)
    }

    #[test]
    fn test_set_get_within_ttl() {
        let (cache, _storage) = cache_with_storage();
        cache.set(
            "menu",
            serde_json::json!({ "products": [1, 2, 3] }),
            Duration::from_secs(60),
        );
        assert_eq!(
            cache.get("menu").unwrap()["products"],
            serde_json::json!([1, 2, 3])
        );
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_removed() {
        let (cache, storage) = cache_with_storage();
        let stale = serde_json::json!({
            "data": { "products": [] },
            "timestamp": chrono::Utc::now().timestamp_millis() - 10_000,
            "ttl": 5_000,
        });
        storage.set("cache:menu", &stale.to_string()).unwrap();

        assert!(cache.get("menu").is_none());
        assert!(storage.get("cache:menu").is_none(), "expired entry dropped");
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let (cache, storage) = cache_with_storage();
        storage.set("cache:orders", "{not json").unwrap();
        assert!(cache.get("orders").is_none());
        assert!(storage.get("cache:orders").is_none());
    }

    #[test]
    fn test_clear_leaves_non_cache_keys() {
        let (cache, storage) = cache_with_storage();
        cache.set("menu", serde_json::json!([]), Duration::from_secs(60));
        cache.set("orders", serde_json::json!([]), Duration::from_secs(60));
        storage.set("cart-store", "{}").unwrap();

        cache.clear();
        assert!(cache.get("menu").is_none());
        assert!(cache.get("orders").is_none());
        assert_eq!(storage.get("cart-store").as_deref(), Some("{}"));
    }

    #[test]
    fn test_invalidate_prefix() {
        let (cache, _storage) = cache_with_storage();
        cache.set("orders:a1", serde_json::json!([]), Duration::from_secs(60));
        cache.set("orders:b2", serde_json::json!([]), Duration::from_secs(60));
        cache.set("menu:c3", serde_json::json!([]), Duration::from_secs(60));

        cache.invalidate_prefix("orders:");
        assert!(cache.get("orders:a1").is_none());
        assert!(cache.get("orders:b2").is_none());
        assert!(cache.get("menu:c3").is_some());
    }

    #[test]
    fn test_invalidate_single_entry() {
        let (cache, _storage) = cache_with_storage();
        cache.set("menu", serde_json::json!([]), Duration::from_secs(60));
        cache.set("orders", serde_json::json!([]), Duration::from_secs(60));

        cache.invalidate("menu");
        assert!(cache.get("menu").is_none());
        assert!(cache.get("orders").is_some());
    }

    #[test]
    fn test_request_fingerprint_is_stable_and_distinct() {
        let a = request_fingerprint("/Reports/revenue?from=2026-08-01");
        let b = request_fingerprint("/Reports/revenue?from=2026-08-02");
        assert_eq!(a, request_fingerprint("/Reports/revenue?from=2026-08-01"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
