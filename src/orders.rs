//! Orders API surface and the offline-first checkout flow.
//!
//! Checkout never waits for the network: the payload built from a table cart
//! is staged in the offline queue and reported as accepted immediately. The
//! queue's sync worker replays it against `POST /Orders` once a network path
//! exists; the `clientOrderId` inside the payload keeps server-side creation
//! idempotent across retries. Order history reads go through a short-TTL
//! cache.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::{build_query, ApiClient, ApiError};
use crate::cache::{request_fingerprint, TtlCache};
use crate::cart::{discount_amount, grand_total, CartStore, Discount, OrderStatus, TableCart};
use crate::queue::OfflineQueue;

/// Order history is cheap to re-fetch; keep it fresh.
const ORDERS_CACHE_TTL: Duration = Duration::from_secs(30);
const ORDERS_CACHE_PREFIX: &str = "orders:";

pub struct OrderService {
    api: Arc<ApiClient>,
    cart: Arc<CartStore>,
    queue: Arc<OfflineQueue>,
    cache: Arc<TtlCache>,
}

impl OrderService {
    pub fn new(
        api: Arc<ApiClient>,
        cart: Arc<CartStore>,
        queue: Arc<OfflineQueue>,
        cache: Arc<TtlCache>,
    ) -> Self {
        Self {
            api,
            cart,
            queue,
            cache,
        }
    }

    // -- Checkout ------------------------------------------------------------

    /// Submit a table's cart: mark it SUBMITTED, stage the payload in the
    /// offline queue, and report success without waiting for the network.
    ///
    /// Re-running checkout after editing the cart overwrites the staged
    /// payload (same `clientOrderId`) rather than submitting twice.
    pub fn checkout_table(
        &self,
        table_id: &str,
        discount: Option<Discount>,
    ) -> Result<Value, String> {
        let table = self
            .cart
            .table(table_id)
            .ok_or_else(|| format!("No open cart for table {table_id}"))?;
        if table.items.is_empty() {
            return Err(format!("Cart for table {table_id} is empty"));
        }

        let payload = build_order_payload(&table, discount);
        self.cart
            .update_table_status(table_id, OrderStatus::Submitted);
        let entry_id = self.queue.add_order(payload.clone());

        info!(
            table_id,
            client_order_id = %table.client_order_id,
            entry_id = %entry_id,
            "checkout staged for submission"
        );

        Ok(serde_json::json!({
            "queued": true,
            "entryId": entry_id,
            "orderId": table.order_id,
            "clientOrderId": table.client_order_id,
            "total": payload["total"].clone(),
        }))
    }

    /// The order is paid and done: drop the table's record entirely so the
    /// next guests start a fresh session.
    pub fn complete_table(&self, table_id: &str) {
        self.cart.clear_table(table_id);
        info!(table_id, "table session completed and cleared");
    }

    // -- REST surface --------------------------------------------------------

    /// `GET /Orders` with optional query options, served from the short-TTL
    /// cache when fresh.
    pub async fn list_orders(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        let path = build_query("/Orders", options);
        let cache_name = format!("{ORDERS_CACHE_PREFIX}{}", request_fingerprint(&path));
        if let Some(cached) = self.cache.get(&cache_name) {
            return Ok(cached);
        }

        let fetched = self.api.get(&path).await?;
        self.cache
            .set(&cache_name, fetched.clone(), ORDERS_CACHE_TTL);
        Ok(fetched)
    }

    /// `GET /Orders/:id`.
    pub async fn get_order(&self, id: &str) -> Result<Value, ApiError> {
        self.api.get(&format!("/Orders/{id}")).await
    }

    /// `POST /Orders` (direct, bypassing the offline queue; used by the
    /// back-office where immediate validation feedback matters).
    pub async fn create_order(&self, payload: Value) -> Result<Value, ApiError> {
        let created = self.api.post("/Orders", payload).await?;
        self.cache.invalidate_prefix(ORDERS_CACHE_PREFIX);
        Ok(created)
    }

    /// `PUT /Orders/:id`.
    pub async fn update_order(&self, id: &str, payload: Value) -> Result<Value, ApiError> {
        let updated = self.api.put(&format!("/Orders/{id}"), payload).await?;
        self.cache.invalidate_prefix(ORDERS_CACHE_PREFIX);
        Ok(updated)
    }

    /// `DELETE /Orders/:id`.
    pub async fn delete_order(&self, id: &str) -> Result<Value, ApiError> {
        let deleted = self.api.delete(&format!("/Orders/{id}")).await?;
        self.cache.invalidate_prefix(ORDERS_CACHE_PREFIX);
        Ok(deleted)
    }
}

/// Build the submission payload for a table cart. Line items keep their
/// persisted shape; totals are derived here so the server receives what the
/// staff screen displayed.
pub fn build_order_payload(table: &TableCart, discount: Option<Discount>) -> Value {
    let subtotal = table.subtotal();
    let discount_value = discount.map(|d| discount_amount(subtotal, d)).unwrap_or(0);
    let total = discount
        .map(|d| grand_total(subtotal, d))
        .unwrap_or(subtotal);

    serde_json::json!({
        "clientOrderId": table.client_order_id,
        "orderId": table.order_id,
        "tableId": table.table_id,
        "customer": table.customer,
        "note": table.note,
        "status": table.status,
        "createdAt": table.created_at,
        "items": table.items,
        "subtotal": subtotal,
        "discount": discount_value,
        "total": total,
    })
}

/// The submit function handed to the sync worker: posts one staged payload
/// and reports failures as the message text the queue classifies on.
pub fn order_submitter(
    api: Arc<ApiClient>,
) -> impl Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync + 'static
{
    move |payload| {
        let api = api.clone();
        Box::pin(async move {
            api.post("/Orders", payload)
                .await
                .map_err(|e| e.to_string())
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiConfig;
    use crate::auth::AuthSession;
    use crate::cart::{Product, Topping};
    use crate::storage::MemoryStorage;
    use crate::testutil::{http_response, serve_responses};

    fn latte() -> Product {
        Product {
            id: "p1".into(),
            title: "Latte".into(),
            price: 45_000,
        }
    }

    fn service_with(base_url: &str) -> (OrderService, Arc<CartStore>, Arc<OfflineQueue>) {
        let storage = Arc::new(MemoryStorage::new());
        let auth = Arc::new(AuthSession::new(storage.clone()));
        let api = Arc::new(
            ApiClient::new(
                base_url,
                auth,
                ApiConfig {
                    timeout: std::time::Duration::from_secs(2),
                    max_retries: 0,
                    retry_delay: std::time::Duration::from_millis(10),
                },
            )
            .unwrap(),
        );
        let cart = Arc::new(CartStore::new(storage.clone()));
        let queue = Arc::new(OfflineQueue::new(storage.clone()));
        let cache = Arc::new(TtlCache::new(storage));
        (
            OrderService::new(api, cart.clone(), queue.clone(), cache),
            cart,
            queue,
        )
    }

    #[test]
    fn test_checkout_stages_payload_with_totals() {
        let (service, cart, queue) = service_with("http://127.0.0.1:9");
        cart.add_to_table(
            "5",
            latte(),
            2,
            vec![Topping {
                id: "t1".into(),
                title: "Honey".into(),
                price: 10_000,
                quantity: 1,
            }],
            "",
        );

        let result = service
            .checkout_table("5", Some(Discount::Percentage(10)))
            .unwrap();
        assert_eq!(result["queued"], true);

        let entries = queue.queue();
        assert_eq!(entries.len(), 1);
        let payload = &entries[0].data;
        assert_eq!(payload["subtotal"], 110_000);
        assert_eq!(payload["discount"], 11_000);
        assert_eq!(payload["total"], 99_000);
        // The order is saved server-side as a draft until payment confirms
        assert_eq!(payload["status"], "DRAFT");
        assert_eq!(payload["items"][0]["key"], "p1:t1x1:");

        // Checkout marks the table but keeps it until complete_table
        assert_eq!(
            cart.table("5").unwrap().status,
            crate::cart::OrderStatus::Submitted
        );
        service.complete_table("5");
        assert!(cart.table("5").is_none());
    }

    #[test]
    fn test_checkout_rejects_missing_or_empty_table() {
        let (service, cart, _queue) = service_with("http://127.0.0.1:9");
        assert!(service.checkout_table("5", None).is_err());

        cart.add_to_table("5", latte(), 1, vec![], "");
        let key = cart.table("5").unwrap().items[0].key.clone();
        cart.remove_from_table("5", &key);
        assert!(service.checkout_table("5", None).is_err());
    }

    #[test]
    fn test_recheckout_after_edit_overwrites_staged_entry() {
        let (service, cart, queue) = service_with("http://127.0.0.1:9");
        cart.add_to_table("5", latte(), 1, vec![], "");
        service.checkout_table("5", None).unwrap();

        cart.add_to_table("5", latte(), 1, vec![], "");
        service.checkout_table("5", None).unwrap();

        let entries = queue.queue();
        assert_eq!(entries.len(), 1, "same clientOrderId must not duplicate");
        assert_eq!(entries[0].data["subtotal"], 90_000);
        assert_eq!(entries[0].attempts, 0);
    }

    #[test]
    fn test_payload_without_discount_keeps_subtotal() {
        let (_service, cart, _queue) = service_with("http://127.0.0.1:9");
        cart.add_to_table("5", latte(), 1, vec![], "");
        let table = cart.table("5").unwrap();

        let payload = build_order_payload(&table, None);
        assert_eq!(payload["subtotal"], 45_000);
        assert_eq!(payload["discount"], 0);
        assert_eq!(payload["total"], 45_000);
        assert_eq!(payload["clientOrderId"], table.client_order_id.as_str());
    }

    #[tokio::test]
    async fn test_list_orders_serves_second_read_from_cache() {
        let base = serve_responses(vec![
            http_response("200 OK", "{\"orders\":[{\"id\":\"o1\"}]}"),
            http_response("200 OK", "{\"orders\":[]}"),
        ])
        .await;
        let (service, _cart, _queue) = service_with(&base);

        let first = service.list_orders(None).await.unwrap();
        let second = service.list_orders(None).await.unwrap();
        assert_eq!(first, second, "second read must come from the cache");
    }

    #[tokio::test]
    async fn test_submitter_maps_api_error_to_message_text() {
        let base = serve_responses(vec![http_response(
            "400 Bad Request",
            "{\"message\":\"Order validation failed\"}",
        )])
        .await;
        let (service, _cart, _queue) = service_with(&base);

        let submit = order_submitter(service.api.clone());
        let err = submit(serde_json::json!({ "clientOrderId": "c1" }))
            .await
            .unwrap_err();
        assert_eq!(err, "Order validation failed (HTTP 400)");
        assert!(!crate::queue::is_transient_submit_error(&err));
    }
}
