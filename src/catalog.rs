//! Product and category administration surface.
//!
//! Thin authenticated wrappers over `/Products` and `/Categories`. Menu
//! reads back the staff ordering screen, so they are cached briefly; any
//! write invalidates every cached menu read.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{build_query, ApiClient, ApiError};
use crate::cache::{request_fingerprint, TtlCache};

const MENU_CACHE_TTL: Duration = Duration::from_secs(60);
const MENU_CACHE_PREFIX: &str = "menu:";

pub struct ProductCatalog {
    api: Arc<ApiClient>,
    cache: Arc<TtlCache>,
}

impl ProductCatalog {
    pub fn new(api: Arc<ApiClient>, cache: Arc<TtlCache>) -> Self {
        Self { api, cache }
    }

    /// `GET /Products` with optional query options (search, category,
    /// pagination), cached per distinct query.
    pub async fn list_products(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        self.cached_get(&build_query("/Products", options)).await
    }

    /// `GET /Products/:id`.
    pub async fn get_product(&self, id: &str) -> Result<Value, ApiError> {
        self.api.get(&format!("/Products/{id}")).await
    }

    /// `POST /Products`.
    pub async fn create_product(&self, payload: Value) -> Result<Value, ApiError> {
        let created = self.api.post("/Products", payload).await?;
        self.cache.invalidate_prefix(MENU_CACHE_PREFIX);
        Ok(created)
    }

    /// `PUT /Products/:id` (full replacement).
    pub async fn update_product(&self, id: &str, payload: Value) -> Result<Value, ApiError> {
        let updated = self.api.put(&format!("/Products/{id}"), payload).await?;
        self.cache.invalidate_prefix(MENU_CACHE_PREFIX);
        Ok(updated)
    }

    /// `PATCH /Products/:id` (partial update, e.g. toggling availability).
    pub async fn patch_product(&self, id: &str, payload: Value) -> Result<Value, ApiError> {
        let patched = self.api.patch(&format!("/Products/{id}"), payload).await?;
        self.cache.invalidate_prefix(MENU_CACHE_PREFIX);
        Ok(patched)
    }

    /// `DELETE /Products/:id`.
    pub async fn delete_product(&self, id: &str) -> Result<Value, ApiError> {
        let deleted = self.api.delete(&format!("/Products/{id}")).await?;
        self.cache.invalidate_prefix(MENU_CACHE_PREFIX);
        Ok(deleted)
    }

    /// `GET /Categories`, cached.
    pub async fn list_categories(&self) -> Result<Value, ApiError> {
        self.cached_get("/Categories").await
    }

    async fn cached_get(&self, path: &str) -> Result<Value, ApiError> {
        let cache_name = format!("{MENU_CACHE_PREFIX}{}", request_fingerprint(path));
        if let Some(cached) = self.cache.get(&cache_name) {
            return Ok(cached);
        }
        let fetched = self.api.get(path).await?;
        self.cache.set(&cache_name, fetched.clone(), MENU_CACHE_TTL);
        Ok(fetched)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
