//! Per-login session wiring.
//!
//! One [`Session`] owns the cart collection, the sync engine, and the
//! order store for a single logged-in user: login constructs, logout
//! resets. There are no process-wide stores; the UI layer holds the
//! session and passes it down to screens.
//!
//! Cart mutations are synchronous and always succeed locally; each one
//! that changes anything marks the sync engine dirty so the background
//! flusher (or an explicit `flush_cart`) pushes the new state best-effort.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::RemoteClient;
use crate::auth::AuthState;
use crate::cart::{CartLine, DocumentRecord, Vendor, VendorCartCollection};
use crate::cart_sync::{spawn_cart_flusher, CartSyncEngine};
use crate::error::Result;
use crate::orders::{CheckoutOutcome, OrderStore};
use crate::poller::PollHandle;

pub struct Session<C: RemoteClient> {
    pub auth: Arc<AuthState>,
    cart: Arc<Mutex<VendorCartCollection>>,
    pub sync: Arc<CartSyncEngine<C>>,
    pub orders: OrderStore<C>,
}

impl<C: RemoteClient> Session<C> {
    pub fn new(client: C) -> Self {
        let client = Arc::new(client);
        let cart = Arc::new(Mutex::new(VendorCartCollection::new()));
        Self {
            auth: Arc::new(AuthState::new()),
            sync: Arc::new(CartSyncEngine::new(client.clone(), cart.clone())),
            orders: OrderStore::new(client),
            cart,
        }
    }

    // -- auth lifecycle -----------------------------------------------------

    /// Adopt a freshly issued token and pull the cloud cart (the
    /// unauthenticated -> authenticated transition is one of the two
    /// sanctioned pull points).
    pub async fn login(&self, token: &str) {
        self.auth.login(token);
        self.sync.pull(&self.auth.header()).await;
    }

    /// Restore a persisted session from the credential store, pulling the
    /// cloud cart when one exists. Returns whether a session was restored.
    pub async fn resume(&self) -> bool {
        if !self.auth.restore() {
            return false;
        }
        self.sync.pull(&self.auth.header()).await;
        true
    }

    /// Explicit refresh gesture / app-foreground pull.
    pub async fn refresh(&self) {
        self.sync.pull(&self.auth.header()).await;
    }

    /// Tear down the session: forget the token and drop all local state.
    pub fn logout(&self) {
        self.auth.logout();
        *self.cart.lock().unwrap() = VendorCartCollection::new();
        self.sync.reset();
        self.orders.reset();
    }

    // -- cart mutations (local-first, never block or error) -----------------

    pub fn add_line(&self, vendor: Vendor, line: CartLine) -> String {
        let id = self.cart.lock().unwrap().add_line(vendor, line);
        self.sync.mark_dirty();
        id
    }

    pub fn remove_line(&self, vendor: Vendor, line_id: &str) {
        if self.cart.lock().unwrap().remove_line(vendor, line_id) {
            self.sync.mark_dirty();
        }
    }

    pub fn change_quantity(&self, vendor: Vendor, line_id: &str, delta: i32) {
        if self.cart.lock().unwrap().change_quantity(vendor, line_id, delta) {
            self.sync.mark_dirty();
        }
    }

    pub fn clear_cart(&self, vendor: Option<Vendor>) {
        if self.cart.lock().unwrap().clear(vendor) {
            self.sync.mark_dirty();
        }
    }

    pub fn remove_document(&self, id: &str) {
        if self.cart.lock().unwrap().remove_document(id) {
            self.sync.mark_dirty();
        }
    }

    // -- cart reads ---------------------------------------------------------

    pub fn cart_lines(&self, vendor: Vendor) -> Vec<CartLine> {
        self.cart.lock().unwrap().lines_for(vendor).to_vec()
    }

    pub fn cart_documents(&self) -> Vec<DocumentRecord> {
        self.cart.lock().unwrap().documents().to_vec()
    }

    pub fn cart_line_count(&self) -> u32 {
        self.cart.lock().unwrap().total_line_count()
    }

    pub fn cart_totals(&self) -> std::collections::BTreeMap<Vendor, f64> {
        self.cart.lock().unwrap().totals_by_vendor()
    }

    // -- sync ---------------------------------------------------------------

    /// Push the current cart now instead of waiting for the flusher.
    pub async fn flush_cart(&self) {
        self.sync.push(&self.auth.header()).await;
    }

    // -- checkout -----------------------------------------------------------

    /// Place every vendor cart sequentially, then push the (now partly or
    /// fully cleared) collection so the cloud copy matches.
    pub async fn checkout(&self) -> Result<CheckoutOutcome> {
        let outcome = self.orders.place_all(&self.cart, &self.auth.header()).await?;
        if !outcome.placed.is_empty() {
            self.sync.mark_dirty();
            self.sync.push(&self.auth.header()).await;
        }
        Ok(outcome)
    }
}

impl<C: RemoteClient + Send + Sync + 'static> Session<C> {
    /// Start the debounced background cart flusher. Dropping the handle
    /// stops it; call at login, drop at logout.
    pub fn start_cart_flusher(&self, debounce: Duration) -> PollHandle {
        spawn_cart_flusher(self.sync.clone(), self.auth.clone(), debounce)
    }
}
