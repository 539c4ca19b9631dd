//! Cafe POS client core.
//!
//! Library backing the two client apps of the café ordering system: the
//! staff POS (cart/table management, offline-first checkout, order history)
//! and the admin back-office (product, user, and report administration).
//! Both consume the remote HTTP+JSON ordering API; everything that must
//! survive a restart (the cart store, the offline order queue, the auth
//! session, UI preferences, and read caches) persists through an injected
//! storage adapter backed by a local SQLite database.
//!
//! [`App::init`] is the composition root: it wires the persisted stores,
//! the API client, and the background sync worker together and hands them
//! to the UI shell as explicit shared references.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod api;
pub mod auth;
pub mod cache;
pub mod cart;
pub mod catalog;
pub mod db;
pub mod logging;
pub mod orders;
pub mod queue;
pub mod reports;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod users;

use api::{ApiClient, ApiConfig};
use auth::AuthSession;
use cache::TtlCache;
use cart::CartStore;
use catalog::ProductCatalog;
use orders::OrderService;
use queue::OfflineQueue;
use reports::ReportService;
use settings::Preferences;
use storage::{SqliteStorage, StorageAdapter};
use sync::SyncHandle;
use users::UserAdmin;

/// First non-empty string value found under any of the given keys.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the ordering REST API.
    pub api_base_url: String,
    /// Directory holding the local database (and usually the log files).
    pub data_dir: PathBuf,
    /// Periodic offline-queue replay interval.
    pub sync_interval: Duration,
    /// HTTP timeout and retry policy.
    pub api: ApiConfig,
}

impl Config {
    pub fn new(api_base_url: &str, data_dir: PathBuf) -> Self {
        Self {
            api_base_url: api_base_url.to_string(),
            data_dir,
            sync_interval: sync::DEFAULT_SYNC_INTERVAL,
            api: ApiConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Application assembly
// ---------------------------------------------------------------------------

/// All long-lived client state, constructed once at startup and passed by
/// reference to every screen. Nothing in here is a hidden global.
pub struct App {
    pub storage: Arc<dyn StorageAdapter>,
    pub auth: Arc<AuthSession>,
    pub api: Arc<ApiClient>,
    pub cache: Arc<TtlCache>,
    pub cart: Arc<CartStore>,
    pub queue: Arc<OfflineQueue>,
    pub orders: Arc<OrderService>,
    pub catalog: Arc<ProductCatalog>,
    pub users: Arc<UserAdmin>,
    pub reports: Arc<ReportService>,
    pub prefs: Arc<Preferences>,
    pub sync: Arc<SyncHandle>,
}

impl App {
    /// Initialize with the production SQLite storage at
    /// `{data_dir}/pos.db`. Must be called inside a tokio runtime: the
    /// background sync worker is spawned here.
    pub fn init(config: &Config) -> Result<Self, String> {
        let db = Arc::new(db::init(&config.data_dir)?);
        let storage: Arc<dyn StorageAdapter> = Arc::new(SqliteStorage::new(db));
        Self::init_with_storage(config, storage)
    }

    /// Initialize over an explicit storage adapter (tests use
    /// [`storage::MemoryStorage`]).
    pub fn init_with_storage(
        config: &Config,
        storage: Arc<dyn StorageAdapter>,
    ) -> Result<Self, String> {
        let auth = Arc::new(AuthSession::new(storage.clone()));
        let api = Arc::new(ApiClient::new(
            &config.api_base_url,
            auth.clone(),
            config.api.clone(),
        )?);
        let cache = Arc::new(TtlCache::new(storage.clone()));
        let cart = Arc::new(CartStore::new(storage.clone()));
        let queue = Arc::new(OfflineQueue::new(storage.clone()));

        let sync = sync::start_sync_loop(
            queue.clone(),
            orders::order_submitter(api.clone()),
            config.sync_interval,
        );

        let orders = Arc::new(OrderService::new(
            api.clone(),
            cart.clone(),
            queue.clone(),
            cache.clone(),
        ));
        let catalog = Arc::new(ProductCatalog::new(api.clone(), cache.clone()));
        let users = Arc::new(UserAdmin::new(api.clone()));
        let reports = Arc::new(ReportService::new(api.clone(), cache.clone()));
        let prefs = Arc::new(Preferences::new(storage.clone()));

        info!(base_url = %api.base_url(), "Cafe POS core initialized");

        Ok(Self {
            storage,
            auth,
            api,
            cache,
            cart,
            queue,
            orders,
            catalog,
            users,
            reports,
            prefs,
            sync,
        })
    }

    /// Stop the background sync worker. Persisted state needs no teardown.
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Test HTTP harness
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::Product;
    use crate::storage::MemoryStorage;
    use crate::testutil::{http_response, serve_responses};

    #[test]
    fn test_value_str_picks_first_non_empty_key() {
        let v = serde_json::json!({ "clientOrderId": "  c1  ", "id": "" });
        assert_eq!(
            value_str(&v, &["id", "clientOrderId"]),
            Some("c1".to_string())
        );
        assert_eq!(value_str(&v, &["missing"]), None);
    }

    #[tokio::test]
    async fn test_checkout_flows_through_queue_to_api() {
        let base = serve_responses(vec![http_response(
            "201 Created",
            "{\"id\":\"srv-1\",\"status\":\"DRAFT\"}",
        )])
        .await;

        let mut config = Config::new(&base, std::path::PathBuf::from("unused"));
        config.api.max_retries = 0;
        config.api.retry_delay = Duration::from_millis(10);
        let app = App::init_with_storage(&config, Arc::new(MemoryStorage::new())).unwrap();

        app.cart.add_to_table(
            "5",
            Product {
                id: "p1".into(),
                title: "Latte".into(),
                price: 45_000,
            },
            2,
            vec![],
            "",
        );
        let staged = app.orders.checkout_table("5", None).unwrap();
        assert_eq!(staged["queued"], true);

        // The sync worker picks the entry up and posts it
        for _ in 0..100 {
            if app.queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(app.queue.is_empty(), "staged order should reach the API");

        app.orders.complete_table("5");
        assert!(app.cart.table("5").is_none());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_checkout_survives_restart() {
        let storage = Arc::new(MemoryStorage::new());
        let mut config = Config::new("http://127.0.0.1:9", std::path::PathBuf::from("unused"));
        config.api.max_retries = 0;
        config.api.retry_delay = Duration::from_millis(10);

        {
            let app = App::init_with_storage(&config, storage.clone()).unwrap();
            app.cart.add_to_table(
                "5",
                Product {
                    id: "p1".into(),
                    title: "Latte".into(),
                    price: 45_000,
                },
                1,
                vec![],
                "",
            );
            app.orders.checkout_table("5", None).unwrap();
            // Unreachable API: the pass fails transiently, the entry stays
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(app.queue.len(), 1);
            app.shutdown().await;
        }

        // A fresh app over the same storage still sees the pending order
        let app = App::init_with_storage(&config, storage).unwrap();
        let entries = app.queue.queue();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].attempts >= 1);
        app.shutdown().await;
    }
}
