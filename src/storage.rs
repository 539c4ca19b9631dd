//! Persisted local storage behind an injected adapter.
//!
//! The cart store, offline queue, auth session, preferences, and read caches
//! all persist through [`StorageAdapter`] rather than touching ambient
//! storage directly. Production uses [`SqliteStorage`] over the
//! `local_settings` table; tests use [`MemoryStorage`]. Storage is
//! last-write-wins: there is no locking or transaction across keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::db::{self, DbState};

/// Well-known storage keys shared across modules.
pub const KEY_CART_STORE: &str = "cart-store";
pub const KEY_OFFLINE_ORDERS: &str = "offline-orders";
pub const KEY_AUTH_SESSION: &str = "auth-session";
pub const KEY_THEME: &str = "ui-theme";
pub const KEY_LOCALE: &str = "ui-locale";
/// Prefix under which TTL cache entries are stored.
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// Key-value storage seam for all persisted client state.
///
/// Reads never fail: a missing or unreadable value is `None`. Writes surface
/// errors so callers can apply their own degradation policy (the cache layer
/// wipes and retries once; the cart store and queue log and carry on).
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
    /// All stored keys, sorted.
    fn keys(&self) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// In-memory adapter (tests, ephemeral sessions)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|e| e.to_string())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|e| e.to_string())?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.entries.lock() {
            Ok(entries) => entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }
}

// ---------------------------------------------------------------------------
// SQLite-backed adapter (production)
// ---------------------------------------------------------------------------

/// Category under which adapter values live in `local_settings`.
const STORAGE_CATEGORY: &str = "local";

pub struct SqliteStorage {
    db: Arc<DbState>,
}

impl SqliteStorage {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

impl StorageAdapter for SqliteStorage {
    fn get(&self, key: &str) -> Option<String> {
        let conn = match self.db.conn.lock() {
            Ok(c) => c,
            Err(e) => {
                warn!(key, error = %e, "storage: connection lock poisoned on read");
                return None;
            }
        };
        db::get_setting(&conn, STORAGE_CATEGORY, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        db::set_setting(&conn, STORAGE_CATEGORY, key, value)
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        db::delete_setting(&conn, STORAGE_CATEGORY, key)
    }

    fn keys(&self) -> Vec<String> {
        let conn = match self.db.conn.lock() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "storage: connection lock poisoned on keys()");
                return Vec::new();
            }
        };
        db::list_keys(&conn, STORAGE_CATEGORY)
    }
}

// ---------------------------------------------------------------------------
// JSON helpers shared by the persisted singletons
// ---------------------------------------------------------------------------

/// Read and parse a JSON value from storage. Absent or corrupt blobs read as
/// `Null` so callers degrade to their empty shape instead of erroring.
pub fn read_json(storage: &dyn StorageAdapter, key: &str) -> serde_json::Value {
    if let Some(raw) = storage.get(key) {
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(parsed) => return parsed,
            Err(e) => warn!(key, error = %e, "storage: discarding corrupt JSON blob"),
        }
    }
    serde_json::Value::Null
}

/// Read a JSON array from storage; anything else reads as empty.
pub fn read_json_array(storage: &dyn StorageAdapter, key: &str) -> Vec<serde_json::Value> {
    read_json(storage, key)
        .as_array()
        .cloned()
        .unwrap_or_default()
}

/// Serialize and persist a JSON value.
pub fn write_json(
    storage: &dyn StorageAdapter,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), String> {
    storage.set(key, &value.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================
