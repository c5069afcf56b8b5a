//! CampusGo core — campus services ordering client.
//!
//! The headless half of the CampusGo mobile client: a local-first
//! multi-vendor cart reconciled against the cloud copy, and an order
//! store driving vendor/customer screens off a polled order lifecycle.
//! Screens, navigation, and token issuance live in the host app; this
//! crate owns state, sync, and the lifecycle rules.
//!
//! Everything hangs off a per-login [`Session`]: construct it after
//! login (or [`Session::resume`] a persisted one), hand it to screens,
//! and drop/reset it at logout.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod auth;
pub mod cart;
pub mod cart_sync;
pub mod error;
pub mod lifecycle;
pub mod orders;
pub mod poller;
pub mod session;
pub mod storage;

pub use api::{ApiClient, RemoteClient};
pub use auth::{AuthHeader, AuthState};
pub use cart::{CartLine, DocumentRecord, PrintingOptions, Vendor, VendorCart, VendorCartCollection};
pub use cart_sync::{spawn_cart_flusher, CartSyncEngine, SyncStatus};
pub use error::{Error, Result};
pub use lifecycle::OrderStatus;
pub use orders::{CheckoutOutcome, Order, OrderLineItem, OrderStore, PollOutcome, PLATFORM_FEE};
pub use poller::{spawn_poll_ticker, PollHandle, Tick};
pub use session::Session;

/// Initialize structured logging for the host process. Call once at
/// startup; respects `RUST_LOG`, defaulting to info with debug for this
/// crate.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,campusgo=debug"));
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}
