//! Reporting dashboards surface.
//!
//! Read-only wrappers over `/Reports/*`. Dashboard widgets poll these on
//! every screen focus, so responses are cached briefly per distinct query.
//! Export is never cached.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{build_query, ApiClient, ApiError};
use crate::cache::{request_fingerprint, TtlCache};

const REPORTS_CACHE_TTL: Duration = Duration::from_secs(300);
const REPORTS_CACHE_PREFIX: &str = "reports:";

pub struct ReportService {
    api: Arc<ApiClient>,
    cache: Arc<TtlCache>,
}

impl ReportService {
    pub fn new(api: Arc<ApiClient>, cache: Arc<TtlCache>) -> Self {
        Self { api, cache }
    }

    /// `GET /Reports/daily`: today's headline numbers.
    pub async fn daily(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        self.cached_get(&build_query("/Reports/daily", options)).await
    }

    /// `GET /Reports/revenue`: revenue over a date range.
    pub async fn revenue(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        self.cached_get(&build_query("/Reports/revenue", options))
            .await
    }

    /// `GET /Reports/products`: best and worst sellers.
    pub async fn products(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        self.cached_get(&build_query("/Reports/products", options))
            .await
    }

    /// `GET /Reports/payment-methods`: takings split by payment method.
    pub async fn payment_methods(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        self.cached_get(&build_query("/Reports/payment-methods", options))
            .await
    }

    /// `GET /Reports/export`: uncached full export for download.
    pub async fn export(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        self.api.get(&build_query("/Reports/export", options)).await
    }

    /// Drop every cached report (e.g. after the business day is closed).
    pub fn invalidate(&self) {
        self.cache.invalidate_prefix(REPORTS_CACHE_PREFIX);
    }

    async fn cached_get(&self, path: &str) -> Result<Value, ApiError> {
        let cache_name = format!("{REPORTS_CACHE_PREFIX}{}", request_fingerprint(path));
        if let Some(cached) = self.cache.get(&cache_name) {
            return Ok(cached);
        }
        let fetched = self.api.get(path).await?;
        self.cache
            .set(&cache_name, fetched.clone(), REPORTS_CACHE_TTL);
        Ok(fetched)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
