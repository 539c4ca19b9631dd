//! Cart/table state store.
//!
//! In-memory reducer over the POS cart state: one default takeaway cart plus
//! one cart per open table. All mutations are synchronous, total, and never
//! fail; operations referencing a missing table or line key degrade to
//! no-ops. Every successful mutation re-serializes the entire store to the
//! injected storage adapter, matching the persisted blob consumed by the
//! frontends (camelCase field names, prices in integer minor units).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::{self, StorageAdapter, KEY_CART_STORE};

/// Table id used for the default walk-up/takeaway flow.
pub const TAKEAWAY_TABLE_ID: &str = "takeaway";

/// Customer label applied when the staff does not capture a name.
const WALK_IN_CUSTOMER: &str = "Walk-in";

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Product snapshot captured at add time (not a live catalog reference).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    /// Minor currency units.
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topping {
    pub id: String,
    pub title: String,
    pub price: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    /// Deterministic identity: two adds producing the same key are the same
    /// logical line and merge by summing quantities.
    pub key: String,
    pub product: Product,
    pub quantity: i64,
    pub toppings: Vec<Topping>,
    pub note: String,
}

impl CartLineItem {
    /// Line total: topping prices are scaled by the line quantity only, not
    /// by each topping's own quantity field.
    pub fn line_total(&self) -> i64 {
        let toppings: i64 = self.toppings.iter().map(|t| t.price).sum();
        (self.product.price + toppings) * self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Draft,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCart {
    pub table_id: String,
    pub items: Vec<CartLineItem>,
    /// Display-facing short code, generated once per table session.
    pub order_id: String,
    /// Idempotency key attached to the order payload on submission.
    pub client_order_id: String,
    pub status: OrderStatus,
    pub customer: String,
    pub note: String,
    pub created_at: String,
}

impl TableCart {
    fn new(table_id: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            items: Vec::new(),
            order_id: generate_order_code(),
            client_order_id: Uuid::new_v4().to_string(),
            status: OrderStatus::Draft,
            customer: WALK_IN_CUSTOMER.to_string(),
            note: String::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn subtotal(&self) -> i64 {
        subtotal(&self.items)
    }
}

/// The full persisted store: default cart items plus per-table carts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartState {
    pub items: Vec<CartLineItem>,
    pub tables: BTreeMap<String, TableCart>,
}

// ---------------------------------------------------------------------------
// Identity keys and totals
// ---------------------------------------------------------------------------

/// Compute the deterministic line-item key: product id, sorted topping
/// id/quantity pairs, and the free-text note. A plain product with no
/// toppings and no note yields `"{id}::"`.
pub fn line_item_key(product_id: &str, toppings: &[Topping], note: &str) -> String {
    let mut parts: Vec<String> = toppings
        .iter()
        .map(|t| format!("{}x{}", t.id, t.quantity))
        .collect();
    parts.sort();
    format!("{}:{}:{}", product_id, parts.join(","), note)
}

/// Sum of line totals.
pub fn subtotal(items: &[CartLineItem]) -> i64 {
    items.iter().map(CartLineItem::line_total).sum()
}

/// Discount applied at checkout; the caller chooses the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum Discount {
    Percentage(i64),
    Amount(i64),
}

/// Discount amount for a given subtotal: `floor(S * pct / 100)` for
/// percentage discounts, the flat value otherwise.
pub fn discount_amount(subtotal: i64, discount: Discount) -> i64 {
    match discount {
        Discount::Percentage(pct) => subtotal * pct / 100,
        Discount::Amount(value) => value,
    }
}

/// Grand total: never negative, even when the discount exceeds the subtotal.
pub fn grand_total(subtotal: i64, discount: Discount) -> i64 {
    (subtotal - discount_amount(subtotal, discount)).max(0)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Cart store constructed once at application start and shared by reference.
///
/// Hydrates from the persisted blob on construction (absent or corrupt blobs
/// start empty; the persisted schema carries no version and is not migrated)
/// and re-serializes the whole state after every mutation.
pub struct CartStore {
    state: Mutex<CartState>,
    storage: Arc<dyn StorageAdapter>,
}

impl CartStore {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        let state = match storage.get(KEY_CART_STORE) {
            Some(raw) => match serde_json::from_str::<CartState>(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "cart: corrupt persisted store, starting empty");
                    CartState::default()
                }
            },
            None => CartState::default(),
        };
        Self {
            state: Mutex::new(state),
            storage,
        }
    }

    /// Snapshot of the full state (display layers iterate over this).
    pub fn snapshot(&self) -> CartState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// The default takeaway cart's line items.
    pub fn items(&self) -> Vec<CartLineItem> {
        self.state
            .lock()
            .map(|s| s.items.clone())
            .unwrap_or_default()
    }

    /// A table's cart, if one is open.
    pub fn table(&self, table_id: &str) -> Option<TableCart> {
        self.state.lock().ok()?.tables.get(table_id).cloned()
    }

    // -- Mutations ----------------------------------------------------------

    /// Add to the default takeaway cart.
    pub fn add(&self, product: Product, quantity: i64, toppings: Vec<Topping>, note: &str) {
        self.mutate(|state| {
            merge_line(&mut state.items, product, quantity, toppings, note);
            true
        });
    }

    /// Add to a table's cart, opening the table session on first use.
    pub fn add_to_table(
        &self,
        table_id: &str,
        product: Product,
        quantity: i64,
        toppings: Vec<Topping>,
        note: &str,
    ) {
        self.mutate(|state| {
            let table = get_or_create_table(state, table_id);
            merge_line(&mut table.items, product, quantity, toppings, note);
            true
        });
    }

    /// Remove a line from the default cart. No-op if the key is absent.
    pub fn remove(&self, key: &str) {
        self.mutate(|state| remove_line(&mut state.items, key));
    }

    /// Remove a line from a table's cart. No-op if the table has no cart.
    /// The table record itself stays open even when its last item goes.
    pub fn remove_from_table(&self, table_id: &str, key: &str) {
        self.mutate(|state| match state.tables.get_mut(table_id) {
            Some(table) => remove_line(&mut table.items, key),
            None => false,
        });
    }

    /// Replace a line's quantity in the default cart, floored at 1.
    pub fn set_quantity(&self, key: &str, quantity: i64) {
        self.mutate(|state| set_line_quantity(&mut state.items, key, quantity));
    }

    /// Replace a line's quantity in a table's cart, floored at 1.
    pub fn update_table_quantity(&self, table_id: &str, key: &str, quantity: i64) {
        self.mutate(|state| match state.tables.get_mut(table_id) {
            Some(table) => set_line_quantity(&mut table.items, key, quantity),
            None => false,
        });
    }

    /// Set a line item's note. The line keeps its add-time identity key.
    pub fn update_item_note(&self, table_id: &str, key: &str, note: &str) {
        self.mutate(|state| {
            let Some(table) = state.tables.get_mut(table_id) else {
                return false;
            };
            match table.items.iter_mut().find(|item| item.key == key) {
                Some(item) => {
                    item.note = note.to_string();
                    true
                }
                None => false,
            }
        });
    }

    /// Set the order-wide note, opening the table session if needed.
    pub fn update_table_note(&self, table_id: &str, note: &str) {
        self.mutate(|state| {
            let table = get_or_create_table(state, table_id);
            table.note = note.to_string();
            true
        });
    }

    /// Set a table's order status. No-op if the table has no cart.
    pub fn update_table_status(&self, table_id: &str, status: OrderStatus) {
        self.mutate(|state| match state.tables.get_mut(table_id) {
            Some(table) => {
                table.status = status;
                true
            }
            None => false,
        });
    }

    /// Remove the table's entire record: the session is over. Distinct from
    /// emptying its items, which keeps the record and its order ids.
    pub fn clear_table(&self, table_id: &str) {
        self.mutate(|state| state.tables.remove(table_id).is_some());
    }

    /// Empty the default cart's items.
    pub fn clear(&self) {
        self.mutate(|state| {
            if state.items.is_empty() {
                return false;
            }
            state.items.clear();
            true
        });
    }

    // -- Internals ----------------------------------------------------------

    /// Apply a mutation and, when it changed anything, persist the whole
    /// store. Persistence failures are logged and swallowed; the reducer
    /// itself never fails.
    fn mutate<F>(&self, apply: F)
    where
        F: FnOnce(&mut CartState) -> bool,
    {
        let Ok(mut state) = self.state.lock() else {
            warn!("cart: state lock poisoned, dropping mutation");
            return;
        };
        if !apply(&mut state) {
            debug!("cart: mutation was a no-op");
            return;
        }
        match serde_json::to_value(&*state) {
            Ok(blob) => {
                if let Err(e) = storage::write_json(self.storage.as_ref(), KEY_CART_STORE, &blob) {
                    warn!(error = %e, "cart: failed to persist store");
                }
            }
            Err(e) => warn!(error = %e, "cart: failed to serialize store"),
        }
    }
}

fn get_or_create_table<'a>(state: &'a mut CartState, table_id: &str) -> &'a mut TableCart {
    state
        .tables
        .entry(table_id.to_string())
        .or_insert_with(|| TableCart::new(table_id))
}

/// Merge an addition into a line list: identical keys sum quantities,
/// otherwise the line is appended (insertion order matters for display).
fn merge_line(
    items: &mut Vec<CartLineItem>,
    product: Product,
    quantity: i64,
    toppings: Vec<Topping>,
    note: &str,
) {
    let quantity = quantity.max(1);
    let key = line_item_key(&product.id, &toppings, note);
    if let Some(existing) = items.iter_mut().find(|item| item.key == key) {
        existing.quantity += quantity;
        return;
    }
    items.push(CartLineItem {
        key,
        product,
        quantity,
        toppings,
        note: note.to_string(),
    });
}

fn remove_line(items: &mut Vec<CartLineItem>, key: &str) -> bool {
    let before = items.len();
    items.retain(|item| item.key != key);
    items.len() != before
}

fn set_line_quantity(items: &mut [CartLineItem], key: &str, quantity: i64) -> bool {
    match items.iter_mut().find(|item| item.key == key) {
        Some(item) => {
            item.quantity = quantity.max(1);
            true
        }
        None => false,
    }
}

/// Display-facing short order code, e.g. `ORD-7F3A2C`.
fn generate_order_code() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", id[..6].to_uppercase())
}

// ===========================================================================
// Tests
// ===========================================================================
