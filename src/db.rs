//! Local SQLite database layer for the Cafe POS client core.
//!
//! Uses rusqlite with WAL mode. The database backs the persisted local
//! storage of both apps: one `local_settings` key-value table holds the cart
//! store blob, the offline order queue blob, the auth session, UI
//! preferences, and the TTL read caches.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Initialize the database at `{data_dir}/pos.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("pos.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: the local_settings key-value store.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE INDEX IF NOT EXISTS idx_local_settings_category
            ON local_settings(setting_category);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1 (local_settings table)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Delete a single setting. Succeeds silently when the row does not exist.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )
    .map_err(|e| format!("delete_setting: {e}"))?;
    Ok(())
}

/// List all keys in a category, sorted for deterministic iteration.
pub fn list_keys(conn: &Connection, category: &str) -> Vec<String> {
    let mut stmt = match conn.prepare(
        "SELECT setting_key FROM local_settings WHERE setting_category = ?1 ORDER BY setting_key",
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("list_keys prepare: {e}");
            return Vec::new();
        }
    };

    let rows = match stmt.query_map(params![category], |row| row.get::<_, String>(0)) {
        Ok(r) => r,
        Err(e) => {
            error!("list_keys query: {e}");
            return Vec::new();
        }
    };

    rows.flatten().collect()
}

/// Delete all settings in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )
    .map_err(|e| format!("delete_all_settings: {e}"))?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serial_test::serial;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        run_migrations_for_test(&conn);
        conn
    }

    fn shared_test_dir() -> PathBuf {
        std::env::temp_dir().join("cafe-pos-core-db-tests")
    }

    #[test]
    fn test_set_get_roundtrip() {
        let conn = test_db();
        set_setting(&conn, "local", "theme", "dark").unwrap();
        assert_eq!(
            get_setting(&conn, "local", "theme"),
            Some("dark".to_string())
        );
        // Upsert replaces the previous value
        set_setting(&conn, "local", "theme", "light").unwrap();
        assert_eq!(
            get_setting(&conn, "local", "theme"),
            Some("light".to_string())
        );
    }

    #[test]
    fn test_get_missing_returns_none() {
        let conn = test_db();
        assert_eq!(get_setting(&conn, "local", "nope"), None);
    }

    #[test]
    fn test_delete_setting_is_idempotent() {
        let conn = test_db();
        set_setting(&conn, "local", "cart-store", "{}").unwrap();
        delete_setting(&conn, "local", "cart-store").unwrap();
        assert_eq!(get_setting(&conn, "local", "cart-store"), None);
        // Deleting again must not error
        delete_setting(&conn, "local", "cart-store").unwrap();
    }

    #[test]
    fn test_list_keys_scoped_to_category() {
        let conn = test_db();
        set_setting(&conn, "local", "cache:menu", "{}").unwrap();
        set_setting(&conn, "local", "cache:orders", "{}").unwrap();
        set_setting(&conn, "prefs", "locale", "el").unwrap();

        let keys = list_keys(&conn, "local");
        assert_eq!(keys, vec!["cache:menu", "cache:orders"]);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        // Re-running against an up-to-date schema must be a no-op
        run_migrations_for_test(&conn);
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    #[serial]
    fn test_init_recovers_from_corrupt_file() {
        let dir = shared_test_dir();
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("pos.db"), b"this is not a sqlite file").unwrap();

        let state = init(&dir).expect("init should delete corrupt file and retry");
        let conn = state.conn.lock().unwrap();
        set_setting(&conn, "local", "probe", "ok").unwrap();
        assert_eq!(get_setting(&conn, "local", "probe"), Some("ok".to_string()));
    }

    #[test]
    #[serial]
    fn test_init_persists_across_reopen() {
        let dir = shared_test_dir();
        let _ = fs::remove_dir_all(&dir);

        {
            let state = init(&dir).unwrap();
            let conn = state.conn.lock().unwrap();
            set_setting(&conn, "local", "offline-orders", "[]").unwrap();
        }

        let state = init(&dir).unwrap();
        let conn = state.conn.lock().unwrap();
        assert_eq!(
            get_setting(&conn, "local", "offline-orders"),
            Some("[]".to_string())
        );
    }
}
