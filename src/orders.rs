//! Order placement, polling refresh, and status round trips.
//!
//! [`OrderStore`] keeps three derived views consistent with the lifecycle
//! rules: the staff board (non-terminal orders for vendor screens), the
//! customer's active orders, and history (terminal orders). Orders are
//! never deleted client-side, only re-filed between views as their status
//! changes. Initiating actions (`place`, `update_status`) fail hard;
//! polling refresh fails soft at the call site (the poll loop logs and
//! keeps prior state).

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::api::RemoteClient;
use crate::auth::AuthHeader;
use crate::cart::{round2, Vendor, VendorCartCollection};
use crate::error::{Error, Result};
use crate::lifecycle::{validate_transition, OrderStatus};

/// Fixed per-order platform fee added on top of the vendor subtotal.
pub const PLATFORM_FEE: f64 = 2.0;

/// The single supported payment method in this system.
pub const PAYMENT_METHOD: &str = "cash";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A frozen copy of one cart line at placement time; later cart mutations
/// never touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    #[serde(rename = "productId")]
    pub product_ref: String,
    pub name: String,
    pub quantity: u32,
    #[serde(rename = "price")]
    pub unit_price: f64,
}

/// One order as held by the remote store. `items` and `total_amount` are
/// immutable after creation; only `status` and `updated_at` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub display_order_id: String,
    #[serde(default)]
    pub vendor: Vendor,
    #[serde(default)]
    pub items: Vec<OrderLineItem>,
    pub total_amount: f64,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    pub status: OrderStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_ready_time: Option<DateTime<Utc>>,
}

fn default_payment_method() -> String {
    PAYMENT_METHOD.to_string()
}

/// What one incremental poll did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
    /// Orders inserted or updated by this poll.
    pub changed: usize,
    /// Ids observed for the first time on the board. This, not a
    /// ready-count delta, is the signal for the new-order notification on
    /// vendor screens. Empty on the seeding fetch.
    pub new_order_ids: Vec<String>,
}

/// Result of a multi-vendor checkout. `placed` is the prefix of vendor
/// orders that succeeded before `failed` (if any) stopped the run; the
/// corresponding carts are already cleared.
#[derive(Debug)]
pub struct CheckoutOutcome {
    pub placed: Vec<Order>,
    pub failed: Option<(Vendor, Error)>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct OrderViews {
    board: Vec<Order>,
    active: Vec<Order>,
    history: Vec<Order>,
    seen_ids: HashSet<String>,
    last_fetch: Option<DateTime<Utc>>,
}

impl OrderViews {
    fn status_of(&self, order_id: &str) -> Option<OrderStatus> {
        self.board
            .iter()
            .chain(self.active.iter())
            .chain(self.history.iter())
            .find(|o| o.id == order_id)
            .map(|o| o.status)
    }
}

/// Per-session order state, generic over the transport seam.
pub struct OrderStore<C: RemoteClient> {
    client: Arc<C>,
    views: Mutex<OrderViews>,
    /// Orders with a status update currently on the wire. A second update
    /// for the same order is rejected instead of racing the first.
    in_flight_updates: Mutex<HashSet<String>>,
}

/// Removes the order id from the in-flight set when the update finishes,
/// whichever way it finishes.
struct UpdateGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.id);
    }
}

impl<C: RemoteClient> OrderStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            views: Mutex::new(OrderViews::default()),
            in_flight_updates: Mutex::new(HashSet::new()),
        }
    }

    // -- view accessors -----------------------------------------------------

    /// Staff-facing board: non-terminal orders, newest first.
    pub fn board(&self) -> Vec<Order> {
        self.views.lock().unwrap().board.clone()
    }

    /// Customer-facing active orders.
    pub fn active(&self) -> Vec<Order> {
        self.views.lock().unwrap().active.clone()
    }

    /// Terminal orders (completed / cancelled).
    pub fn history(&self) -> Vec<Order> {
        self.views.lock().unwrap().history.clone()
    }

    /// Watermark of the last successful poll/fetch.
    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.views.lock().unwrap().last_fetch
    }

    /// Drop all order state (logout boundary).
    pub fn reset(&self) {
        *self.views.lock().unwrap() = OrderViews::default();
        self.in_flight_updates.lock().unwrap().clear();
    }

    // -- placement ----------------------------------------------------------

    /// Place one vendor order from frozen line snapshots.
    ///
    /// On success the returned order (status `preparing`) is prepended to
    /// the active view. The caller must not clear the source cart unless
    /// this succeeds.
    pub async fn place(
        &self,
        items: Vec<OrderLineItem>,
        total_amount: f64,
        vendor: Vendor,
        auth: &AuthHeader,
    ) -> Result<Order> {
        auth.require()?;
        let body = json!({
            "items": items,
            "totalAmount": total_amount,
            "vendor": vendor,
            "paymentMethod": PAYMENT_METHOD,
            "status": OrderStatus::Preparing,
        });

        let value = self
            .client
            .request(Method::POST, "/orders", Some(body), auth)
            .await
            .map_err(|e| match e {
                Error::Api { message, .. } => Error::OrderPlacementFailed(message),
                other => other,
            })?;

        let order: Order = parse_order(value)
            .map_err(|e| Error::OrderPlacementFailed(format!("unexpected response: {e}")))?;
        info!(order_id = %order.id, %vendor, total = total_amount, "order placed");

        let mut views = self.views.lock().unwrap();
        views.seen_ids.insert(order.id.clone());
        views.active.insert(0, order.clone());
        Ok(order)
    }

    /// Checkout across every vendor cart, strictly sequentially: a
    /// failure stops the run so the outcome is a clean prefix of placed
    /// orders plus the vendor it stopped at. Each vendor's local cart is
    /// cleared only after its order is accepted.
    pub async fn place_all(
        &self,
        cart: &Mutex<VendorCartCollection>,
        auth: &AuthHeader,
    ) -> Result<CheckoutOutcome> {
        auth.require()?;

        let snapshots: Vec<(Vendor, Vec<OrderLineItem>, f64)> = {
            let cart = cart.lock().unwrap();
            cart.all_carts()
                .into_iter()
                .map(|c| {
                    let items = c
                        .items
                        .iter()
                        .map(|l| OrderLineItem {
                            product_ref: l.id.clone(),
                            name: l.name.clone(),
                            quantity: l.quantity,
                            unit_price: l.unit_price,
                        })
                        .collect();
                    (c.vendor, items, c.subtotal())
                })
                .collect()
        };

        let mut outcome = CheckoutOutcome {
            placed: Vec::new(),
            failed: None,
        };
        for (vendor, items, subtotal) in snapshots {
            let total = round2(subtotal + PLATFORM_FEE);
            match self.place(items, total, vendor, auth).await {
                Ok(order) => {
                    cart.lock().unwrap().clear(Some(vendor));
                    outcome.placed.push(order);
                }
                Err(e) => {
                    warn!(%vendor, error = %e, "checkout stopped at failed vendor order");
                    outcome.failed = Some((vendor, e));
                    break;
                }
            }
        }
        Ok(outcome)
    }

    // -- refresh ------------------------------------------------------------

    /// Full refresh of the staff "all orders" view, replacing current
    /// board state wholesale.
    pub async fn fetch_all(&self, auth: &AuthHeader) -> Result<Vec<Order>> {
        auth.require()?;
        let value = self
            .client
            .request(Method::GET, "/orders/admin", None, auth)
            .await?;
        let orders = parse_order_list(value)?;

        let mut views = self.views.lock().unwrap();
        views.seen_ids = orders.iter().map(|o| o.id.clone()).collect();
        views.board = orders.clone();
        views.last_fetch = Some(Utc::now());
        Ok(orders)
    }

    /// Full refresh that recomputes the active/history partition
    /// client-side from the returned statuses.
    pub async fn fetch_history(&self, auth: &AuthHeader) -> Result<()> {
        auth.require()?;
        let value = self
            .client
            .request(Method::GET, "/orders/history", None, auth)
            .await?;
        let orders = parse_order_list(value)?;

        let mut views = self.views.lock().unwrap();
        let (active, history): (Vec<Order>, Vec<Order>) =
            orders.into_iter().partition(|o| o.status.is_active());
        views.active = active;
        views.history = history;
        Ok(())
    }

    /// Incremental refresh using the `lastFetchTime` watermark.
    ///
    /// The first call (no watermark) seeds the board with a full fetch.
    /// Subsequent calls request only orders updated since the watermark
    /// and merge them: replace in place by id, or prepend as new. After
    /// the merge, terminal orders leave the board and upsert into
    /// history. The watermark always advances on success, even for an
    /// empty delta; on failure nothing moves, so the next poll retries
    /// the same window.
    pub async fn poll_for_changes(&self, auth: &AuthHeader) -> Result<PollOutcome> {
        auth.require()?;
        let since = self.last_fetch();
        let path = match since {
            None => "/orders/admin".to_string(),
            Some(ts) => format!(
                "/orders/admin?lastFetchTime={}",
                ts.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        };

        let value = self.client.request(Method::GET, &path, None, auth).await?;
        let orders = parse_order_list(value)?;
        let seeding = since.is_none();

        let mut views = self.views.lock().unwrap();
        let mut outcome = PollOutcome {
            changed: orders.len(),
            new_order_ids: Vec::new(),
        };

        for order in orders {
            let first_seen = views.seen_ids.insert(order.id.clone());
            if first_seen && !seeding {
                outcome.new_order_ids.push(order.id.clone());
            }
            match views.board.iter_mut().find(|o| o.id == order.id) {
                Some(existing) => *existing = order,
                None => views.board.insert(0, order),
            }
        }

        // Terminal orders leave the board and feed the history view.
        let (terminal, board): (Vec<Order>, Vec<Order>) = std::mem::take(&mut views.board)
            .into_iter()
            .partition(|o| o.status.is_terminal());
        views.board = board;
        for order in terminal {
            views.active.retain(|o| o.id != order.id);
            upsert(&mut views.history, order);
        }

        views.last_fetch = Some(Utc::now());
        if !outcome.new_order_ids.is_empty() {
            info!(count = outcome.new_order_ids.len(), "new orders arrived");
        }
        Ok(outcome)
    }

    /// Refresh a single order for a customer tracking screen. Merges into
    /// the active view only.
    pub async fn track_single(&self, order_id: &str, auth: &AuthHeader) -> Result<Order> {
        auth.require()?;
        let value = self
            .client
            .request(Method::GET, &format!("/orders/{order_id}/track"), None, auth)
            .await?;
        let order: Order = parse_order(value)
            .map_err(|_| Error::NotFound(order_id.to_string()))?;

        let mut views = self.views.lock().unwrap();
        upsert(&mut views.active, order.clone());
        debug!(order_id, status = %order.status, "tracked order refreshed");
        Ok(order)
    }

    // -- status updates -----------------------------------------------------

    /// Change an order's status after validating the transition against
    /// the status held *right now* (an illegal edge never reaches the
    /// network). On success the order is re-filed consistently across all
    /// three views.
    pub async fn update_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        auth: &AuthHeader,
    ) -> Result<Order> {
        auth.require()?;

        let current = self
            .views
            .lock()
            .unwrap()
            .status_of(order_id)
            .ok_or_else(|| Error::NotFound(order_id.to_string()))?;
        validate_transition(current, new_status)?;

        let _guard = self.begin_update(order_id)?;

        let value = self
            .client
            .request(
                Method::PATCH,
                &format!("/orders/{order_id}/status"),
                Some(json!({ "status": new_status })),
                auth,
            )
            .await
            .map_err(|e| match e {
                Error::Api { message, .. } => Error::StatusUpdateFailed(message),
                other => other,
            })?;

        // Prefer the server's copy of the order when the ack carries one.
        let server_order: Option<Order> = value
            .get("order")
            .cloned()
            .and_then(|v| parse_order(v).ok());

        let mut views = self.views.lock().unwrap();
        let updated = apply_status(&mut views, order_id, new_status, server_order)
            .ok_or_else(|| Error::NotFound(order_id.to_string()))?;
        info!(order_id, status = %new_status, "order status updated");
        Ok(updated)
    }

    fn begin_update(&self, order_id: &str) -> Result<UpdateGuard<'_>> {
        let mut set = self.in_flight_updates.lock().unwrap();
        if !set.insert(order_id.to_string()) {
            return Err(Error::StatusUpdateFailed(format!(
                "an update for order {order_id} is already in flight"
            )));
        }
        Ok(UpdateGuard {
            set: &self.in_flight_updates,
            id: order_id.to_string(),
        })
    }
}

/// Replace-by-id or prepend.
fn upsert(view: &mut Vec<Order>, order: Order) {
    match view.iter_mut().find(|o| o.id == order.id) {
        Some(existing) => *existing = order,
        None => view.insert(0, order),
    }
}

/// Mutate the order across every view it appears in, then re-file it if
/// the new status is terminal. Returns the updated order.
fn apply_status(
    views: &mut OrderViews,
    order_id: &str,
    new_status: OrderStatus,
    server_order: Option<Order>,
) -> Option<Order> {
    let mut updated: Option<Order> = server_order;

    for view in [&mut views.board, &mut views.active, &mut views.history] {
        if let Some(order) = view.iter_mut().find(|o| o.id == order_id) {
            match &updated {
                Some(fresh) => *order = fresh.clone(),
                None => {
                    order.status = new_status;
                    order.updated_at = Utc::now();
                    updated = Some(order.clone());
                }
            }
        }
    }

    let updated = updated?;
    if updated.status.is_terminal() {
        views.board.retain(|o| o.id != order_id);
        views.active.retain(|o| o.id != order_id);
        upsert(&mut views.history, updated.clone());
    }
    Some(updated)
}

/// Servers echo both `orderId` and `_id` on order payloads; keep `_id`
/// canonical and fall back to `orderId` only when `_id` is absent (an
/// `orderId` serde alias would trip duplicate-field detection on the
/// common shape carrying both).
fn normalize_order_ids(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(normalize_order_ids),
        Value::Object(obj) => {
            if !obj.contains_key("_id") && !obj.contains_key("id") {
                if let Some(oid) = obj.get("orderId").cloned() {
                    obj.insert("_id".to_string(), oid);
                }
            }
        }
        _ => {}
    }
}

fn parse_order(mut value: Value) -> std::result::Result<Order, serde_json::Error> {
    normalize_order_ids(&mut value);
    serde_json::from_value(value)
}

/// Accept either a bare array or `{ "orders": [...] }`.
fn parse_order_list(value: Value) -> Result<Vec<Order>> {
    let mut list = match value {
        Value::Array(_) => value,
        Value::Object(ref obj) => obj
            .get("orders")
            .cloned()
            .unwrap_or(Value::Array(Vec::new())),
        Value::Null => Value::Array(Vec::new()),
        other => other,
    };
    normalize_order_ids(&mut list);
    serde_json::from_value(list).map_err(|e| Error::UnexpectedResponse(format!("order list: {e}")))
}
