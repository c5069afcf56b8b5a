//! Cloud synchronization for the local cart collection.
//!
//! Local state is always the source of truth for the next push; a failed
//! push never rolls anything back, it just leaves the engine dirty and
//! records the error for the UI. Pull is a full overwrite of local state
//! from the server copy (last-pull-wins) and is only meant to run at
//! well-defined points: login and app foreground. Concurrent edits from
//! two devices under one account clobber each other at whole-collection
//! granularity; that is a documented limitation of this system, not a
//! bug to fix here.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::RemoteClient;
use crate::auth::{AuthHeader, AuthState};
use crate::cart::{CartLine, DocumentRecord, VendorCart, VendorCartCollection};
use crate::poller::PollHandle;

/// Attempts per push before giving up and leaving the engine dirty.
const PUSH_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 5_000;
const MAX_RETRY_DELAY_MS: u64 = 300_000;

// ---------------------------------------------------------------------------
// Sync status
// ---------------------------------------------------------------------------

/// Observable sync state for UI indicators. Errors land here instead of
/// propagating out of cart mutations.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Pulls that discarded unsynced local lines (informational; the
    /// overwrite is by design).
    pub conflicts_ignored: u64,
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CartLatestResponse {
    #[serde(default)]
    cart: Option<CartPayload>,
    #[serde(default)]
    documents: Vec<DocumentRecord>,
}

#[derive(Debug, Deserialize)]
struct CartPayload {
    #[serde(default)]
    items: Vec<CartLine>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates push (local -> cloud) and pull (cloud -> local) of one
/// session's [`VendorCartCollection`].
pub struct CartSyncEngine<C: RemoteClient> {
    client: Arc<C>,
    cart: Arc<Mutex<VendorCartCollection>>,
    /// Serializes pushes: a push triggered during an in-flight push is
    /// coalesced into the trailing loop iteration instead of racing it.
    push_in_flight: AtomicBool,
    /// Local mutations not yet confirmed pushed.
    dirty: AtomicBool,
    status: Mutex<SyncStatus>,
}

impl<C: RemoteClient> CartSyncEngine<C> {
    pub fn new(client: Arc<C>, cart: Arc<Mutex<VendorCartCollection>>) -> Self {
        Self {
            client,
            cart,
            push_in_flight: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    /// Record that local state changed and needs pushing. Called after
    /// every cart mutation; the flusher (or an explicit `push`) picks it
    /// up.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().unwrap().clone()
    }

    #[cfg(test)]
    pub(crate) fn client_for_tests(&self) -> Arc<C> {
        self.client.clone()
    }

    pub fn reset(&self) {
        self.dirty.store(false, Ordering::SeqCst);
        *self.status.lock().unwrap() = SyncStatus::default();
    }

    /// Push the current collection to the cloud, best-effort.
    ///
    /// No-op for anonymous sessions (the local cart stays local until
    /// login). If a push is already in flight the new request is absorbed
    /// by the dirty flag: the running push re-serializes and sends the
    /// latest state before finishing, so a stale payload never overwrites
    /// a newer one.
    pub async fn push(&self, auth: &AuthHeader) {
        if !auth.is_authenticated() {
            debug!("skipping cart push: anonymous session");
            return;
        }
        if self.push_in_flight.swap(true, Ordering::SeqCst) {
            debug!("cart push already in flight; coalescing");
            return;
        }

        loop {
            self.dirty.store(false, Ordering::SeqCst);
            let payload = {
                let cart = self.cart.lock().unwrap();
                json!({
                    "carts": cart.all_carts(),
                    "documents": cart.documents(),
                })
            };

            match self.send_with_retry(payload, auth).await {
                Ok(()) => {
                    let mut status = self.status.lock().unwrap();
                    status.last_sync = Some(Utc::now());
                    status.last_error = None;
                }
                Err(e) => {
                    // Leave dirty so the next attempt retries this state.
                    self.dirty.store(true, Ordering::SeqCst);
                    warn!(error = %e, "cart push failed");
                    self.status.lock().unwrap().last_error = Some(e.to_string());
                    break;
                }
            }

            // A mutation landed while we were sending; go around once more
            // with the fresh state.
            if !self.dirty.load(Ordering::SeqCst) {
                break;
            }
        }

        self.push_in_flight.store(false, Ordering::SeqCst);
    }

    async fn send_with_retry(
        &self,
        payload: serde_json::Value,
        auth: &AuthHeader,
    ) -> crate::error::Result<()> {
        let mut delay_ms = RETRY_BASE_DELAY_MS;
        let mut attempt = 1;
        loop {
            match self
                .client
                .request(Method::POST, "/cart/sync", Some(payload.clone()), auth)
                .await
            {
                Ok(_) => {
                    debug!(attempt, "cart push acknowledged");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < PUSH_MAX_ATTEMPTS => {
                    warn!(attempt, error = %e, "cart push attempt failed; retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replace local state with the server's cart. Full overwrite, not a
    /// merge: unsynced local lines present at pull time are lost (logged
    /// and counted, never fatal). Failures leave local state intact and
    /// land in `status().last_error`.
    pub async fn pull(&self, auth: &AuthHeader) {
        if !auth.is_authenticated() {
            debug!("skipping cart pull: anonymous session");
            return;
        }

        let value = match self
            .client
            .request(Method::GET, "/cart/latest", None, auth)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "cart pull failed; keeping local state");
                self.status.lock().unwrap().last_error = Some(e.to_string());
                return;
            }
        };

        let response: CartLatestResponse = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "cart pull returned an unexpected shape");
                self.status.lock().unwrap().last_error =
                    Some(format!("invalid cart payload: {e}"));
                return;
            }
        };

        let items = response.cart.map(|c| c.items).unwrap_or_default();
        let carts = partition_by_vendor(items);

        let discarded_unsynced = self.is_dirty() && !self.cart.lock().unwrap().is_empty();
        if discarded_unsynced {
            warn!("sync conflict ignored: pull is overwriting unsynced local cart lines");
        }

        {
            let mut cart = self.cart.lock().unwrap();
            cart.replace(carts, response.documents);
        }
        self.dirty.store(false, Ordering::SeqCst);

        let mut status = self.status.lock().unwrap();
        status.last_sync = Some(Utc::now());
        status.last_error = None;
        if discarded_unsynced {
            status.conflicts_ignored += 1;
        }
        info!("cart pulled from cloud");
    }
}

/// Group a flat item list into per-vendor carts, preserving item order.
/// Items without a recognised vendor tag land in the default cart.
fn partition_by_vendor(items: Vec<CartLine>) -> Vec<VendorCart> {
    let mut carts: Vec<VendorCart> = Vec::new();
    for item in items {
        let vendor = item.vendor;
        match carts.iter_mut().find(|c| c.vendor == vendor) {
            Some(cart) => cart.items.push(item),
            None => carts.push(VendorCart {
                vendor,
                items: vec![item],
            }),
        }
    }
    carts
}

// ---------------------------------------------------------------------------
// Background flusher
// ---------------------------------------------------------------------------

/// Spawn the debounced cart flusher: every `debounce` it pushes if any
/// mutation marked the engine dirty since the last push. Bursts of
/// mutations within one window coalesce into a single push. Dropping the
/// returned handle cancels the task.
pub fn spawn_cart_flusher<C>(
    engine: Arc<CartSyncEngine<C>>,
    auth: Arc<AuthState>,
    debounce: Duration,
) -> PollHandle
where
    C: RemoteClient + Send + Sync + 'static,
{
    let handle = PollHandle::new();
    let token = handle.token();
    tokio::spawn(async move {
        info!(debounce_ms = debounce.as_millis() as u64, "cart flusher started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(debounce) => {}
            }
            if engine.is_dirty() {
                engine.push(&auth.header()).await;
            }
        }
        info!("cart flusher stopped");
    });
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockRemote;
    use crate::cart::{PrintingOptions, Vendor};
    use crate::error::Error;
    use serde_json::json;
    use serial_test::serial;

    fn engine_with(remote: Arc<MockRemote>) -> CartSyncEngine<MockRemote> {
        CartSyncEngine::new(remote, Arc::new(Mutex::new(VendorCartCollection::new())))
    }

    fn product(id: &str, price: f64) -> CartLine {
        CartLine {
            id: id.into(),
            name: id.into(),
            unit_price: price,
            quantity: 1,
            vendor: Vendor::Default,
            image_ref: None,
            is_print_item: false,
            printing_options: None,
        }
    }

    #[tokio::test]
    async fn push_sends_carts_and_documents() {
        let remote = Arc::new(MockRemote::new());
        let engine = engine_with(remote.clone());
        {
            let mut cart = engine.cart.lock().unwrap();
            cart.add_line(Vendor::Canteen, product("tea-1", 10.0));
            cart.add_line(Vendor::Canteen, product("tea-1", 10.0));
        }
        engine.mark_dirty();

        engine.push(&AuthHeader::bearer("tok")).await;

        let reqs = remote.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, Method::POST);
        assert_eq!(reqs[0].path, "/cart/sync");
        assert!(reqs[0].authenticated);
        let body = reqs[0].body.as_ref().unwrap();
        assert_eq!(body["carts"][0]["vendor"], "canteen");
        assert_eq!(body["carts"][0]["items"][0]["quantity"], 2);
        assert!(body["documents"].is_array());

        assert!(!engine.is_dirty());
        assert!(engine.status().last_sync.is_some());
        assert!(engine.status().last_error.is_none());
    }

    #[tokio::test]
    async fn anonymous_push_and_pull_make_no_requests() {
        let remote = Arc::new(MockRemote::new());
        let engine = engine_with(remote.clone());
        engine.mark_dirty();

        engine.push(&AuthHeader::anonymous()).await;
        engine.pull(&AuthHeader::anonymous()).await;

        assert_eq!(remote.request_count(), 0);
        assert!(engine.is_dirty(), "dirty state must survive the skipped push");
    }

    #[tokio::test]
    async fn push_while_in_flight_coalesces() {
        let remote = Arc::new(MockRemote::new());
        let engine = engine_with(remote.clone());
        engine.mark_dirty();
        engine.push_in_flight.store(true, Ordering::SeqCst);

        engine.push(&AuthHeader::bearer("tok")).await;

        assert_eq!(remote.request_count(), 0);
        assert!(engine.is_dirty(), "coalesced push leaves state for the running one");
    }

    #[tokio::test(start_paused = true)]
    async fn push_retries_transient_failures_with_backoff() {
        let remote = Arc::new(MockRemote::new());
        remote.enqueue(Err(Error::Timeout {
            url: "https://x".into(),
        }));
        remote.enqueue_ok(json!({ "ok": true }));
        let engine = engine_with(remote.clone());
        engine.mark_dirty();

        engine.push(&AuthHeader::bearer("tok")).await;

        assert_eq!(remote.request_count(), 2);
        assert!(!engine.is_dirty());
        assert!(engine.status().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn push_gives_up_after_bounded_attempts() {
        let remote = Arc::new(MockRemote::new());
        for _ in 0..PUSH_MAX_ATTEMPTS {
            remote.enqueue(Err(Error::Timeout {
                url: "https://x".into(),
            }));
        }
        let engine = engine_with(remote.clone());
        {
            let mut cart = engine.cart.lock().unwrap();
            cart.add_line(Vendor::Canteen, product("tea-1", 10.0));
        }
        engine.mark_dirty();

        engine.push(&AuthHeader::bearer("tok")).await;

        assert_eq!(remote.request_count(), PUSH_MAX_ATTEMPTS as usize);
        assert!(engine.is_dirty(), "failed push keeps local state queued");
        assert!(engine.status().last_error.is_some());
        // Local state untouched by the failure.
        assert_eq!(engine.cart.lock().unwrap().total_line_count(), 1);
    }

    #[tokio::test]
    async fn non_retryable_push_failure_does_not_retry() {
        let remote = Arc::new(MockRemote::new());
        remote.enqueue(Err(Error::Api {
            status: 400,
            message: "bad payload".into(),
        }));
        let engine = engine_with(remote.clone());
        engine.mark_dirty();

        engine.push(&AuthHeader::bearer("tok")).await;

        assert_eq!(remote.request_count(), 1);
        assert!(engine.status().last_error.unwrap().contains("bad payload"));
    }

    #[tokio::test]
    async fn pull_partitions_items_by_vendor_and_overwrites() {
        let remote = Arc::new(MockRemote::new());
        remote.enqueue_ok(json!({
            "cart": {
                "items": [
                    { "_id": "tea-1", "name": "Tea", "price": 10.0, "quantity": 2, "vendor": "canteen" },
                    { "_id": "pen-1", "name": "Pen", "price": 1.5, "quantity": 1, "vendor": "stationery" },
                    { "_id": "stray", "name": "Stray", "price": 3.0, "quantity": 1 }
                ]
            },
            "documents": [
                { "_id": "doc-1", "name": "notes.pdf", "url": "https://cdn/x.pdf" }
            ]
        }));
        let engine = engine_with(remote.clone());
        {
            // Pre-existing local line that the overwrite discards.
            let mut cart = engine.cart.lock().unwrap();
            cart.add_line(Vendor::Office, product("form-7", 1.0));
        }
        engine.mark_dirty();

        engine.pull(&AuthHeader::bearer("tok")).await;

        let cart = engine.cart.lock().unwrap();
        assert_eq!(cart.lines_for(Vendor::Canteen).len(), 1);
        assert_eq!(cart.lines_for(Vendor::Canteen)[0].quantity, 2);
        assert_eq!(cart.lines_for(Vendor::Stationery).len(), 1);
        assert_eq!(cart.lines_for(Vendor::Default).len(), 1, "missing vendor defaults");
        assert!(cart.lines_for(Vendor::Office).is_empty(), "full overwrite");
        assert_eq!(cart.documents().len(), 1);
        drop(cart);

        let status = engine.status();
        assert_eq!(status.conflicts_ignored, 1);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn pull_of_empty_server_cart_empties_local_state() {
        let remote = Arc::new(MockRemote::new());
        remote.enqueue_ok(json!({ "cart": null, "documents": [] }));
        let engine = engine_with(remote.clone());
        {
            let mut cart = engine.cart.lock().unwrap();
            cart.add_line(Vendor::Canteen, product("tea-1", 10.0));
        }

        engine.pull(&AuthHeader::bearer("tok")).await;

        assert!(engine.cart.lock().unwrap().is_empty());
        // Nothing was dirty, so nothing counts as a conflict.
        assert_eq!(engine.status().conflicts_ignored, 0);
    }

    #[tokio::test]
    async fn pull_failure_keeps_local_state() {
        let remote = Arc::new(MockRemote::new());
        remote.enqueue(Err(Error::Network {
            url: "https://x".into(),
            detail: "connection failed".into(),
        }));
        let engine = engine_with(remote.clone());
        {
            let mut cart = engine.cart.lock().unwrap();
            cart.add_line(Vendor::Canteen, product("tea-1", 10.0));
        }

        engine.pull(&AuthHeader::bearer("tok")).await;

        assert_eq!(engine.cart.lock().unwrap().total_line_count(), 1);
        assert!(engine.status().last_error.is_some());
    }

    #[tokio::test]
    async fn push_then_pull_round_trips_line_contents() {
        let remote = Arc::new(MockRemote::new());
        let engine = engine_with(remote.clone());
        {
            let mut cart = engine.cart.lock().unwrap();
            cart.add_line(Vendor::Canteen, product("tea-1", 10.0));
            cart.add_line(Vendor::Canteen, product("samosa-1", 15.0));
            cart.add_line(
                Vendor::Stationery,
                CartLine {
                    id: String::new(),
                    name: "thesis.pdf".into(),
                    unit_price: 1.5,
                    quantity: 1,
                    vendor: Vendor::Default,
                    image_ref: Some("https://cdn/thesis.pdf".into()),
                    is_print_item: true,
                    printing_options: Some(PrintingOptions {
                        copies: 1,
                        color_mode: "color".into(),
                        duplex: "single".into(),
                        page_size: "A4".into(),
                        page_count: 80,
                        note: Some("spiral bind".into()),
                    }),
                },
            );
        }
        engine.mark_dirty();
        let before = engine.cart.lock().unwrap().clone();

        engine.push(&AuthHeader::bearer("tok")).await;

        // Feed the pushed payload back the way the server would serve it:
        // a flat item list plus the document records.
        let pushed = remote.requests()[0].body.clone().unwrap();
        let mut items = Vec::new();
        for cart in pushed["carts"].as_array().unwrap() {
            items.extend(cart["items"].as_array().unwrap().iter().cloned());
        }
        remote.enqueue_ok(json!({
            "cart": { "items": items },
            "documents": pushed["documents"],
        }));

        engine.pull(&AuthHeader::bearer("tok")).await;

        assert_eq!(*engine.cart.lock().unwrap(), before);
    }

    // Logs in through AuthState, which writes the OS keyring best-effort.
    #[tokio::test(start_paused = true)]
    #[serial]
    async fn flusher_pushes_only_when_dirty_and_stops_on_drop() {
        let remote = Arc::new(MockRemote::new());
        let engine = Arc::new(engine_with(remote.clone()));
        let auth = Arc::new(AuthState::new());
        auth.login("tok");

        let handle = spawn_cart_flusher(engine.clone(), auth.clone(), Duration::from_secs(1));

        // Clean engine: a few windows pass with no push.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(remote.request_count(), 0);

        engine.mark_dirty();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(remote.request_count(), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.mark_dirty();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.request_count(), 1, "cancelled flusher must not push");

        auth.logout();
    }
}
