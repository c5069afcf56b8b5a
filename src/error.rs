//! Crate-wide error taxonomy.
//!
//! Cart mutations never return errors (they are pure local transforms);
//! everything that crosses the network or the order state machine funnels
//! through [`Error`]. Background refresh paths log and keep prior state
//! instead of propagating, see `orders::OrderStore::poll_for_changes`.

use crate::lifecycle::OrderStatus;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Transport-level failure (connect, DNS, protocol).
    #[error("Cannot reach campus services at {url}: {detail}")]
    Network { url: String, detail: String },

    /// The request did not complete within the configured deadline.
    #[error("Connection to {url} timed out")]
    Timeout { url: String },

    /// An authenticated-only call was attempted without a bearer token.
    /// Rejected client-side; no request is made.
    #[error("Authentication required: no session token")]
    AuthenticationRequired,

    /// A status change that the order lifecycle does not allow.
    /// Rejected locally; no request is made and stored state is unchanged.
    #[error("Invalid order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The server rejected an order placement.
    #[error("Order placement failed: {0}")]
    OrderPlacementFailed(String),

    /// The server rejected a status update that passed local validation.
    #[error("Status update failed: {0}")]
    StatusUpdateFailed(String),

    /// Order lookup miss (unknown id).
    #[error("Order not found: {0}")]
    NotFound(String),

    /// Non-2xx response with whatever detail the server provided.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    /// A 2xx body that did not decode into the expected shape. Not
    /// retryable; the server will send the same bytes again.
    #[error("Unexpected response from campus services: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Whether retrying the same request later could plausibly succeed.
    /// Drives the cart push retry loop and lets the UI offer a retry
    /// button for checkout/status failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Timeout { .. } => true,
            Error::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
