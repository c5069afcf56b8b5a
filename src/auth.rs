//! Session token holder and auth header production.
//!
//! Token issuance itself is external (the campus identity service); this
//! module only holds the opaque bearer token for the lifetime of a
//! session, persists it via `storage`, and produces the `Authorization`
//! header value for API calls. Unauthenticated sessions produce an empty
//! header set, and authenticated-only calls are rejected client-side via
//! [`AuthHeader::require`] before any request is made.

use std::sync::Mutex;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::storage;

// ---------------------------------------------------------------------------
// AuthHeader
// ---------------------------------------------------------------------------

/// The `Authorization` header for one request, or nothing when the
/// session is anonymous.
#[derive(Debug, Clone)]
pub struct AuthHeader(Option<String>);

impl AuthHeader {
    pub fn bearer(token: &str) -> Self {
        Self(Some(format!("Bearer {}", token.trim())))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn is_authenticated(&self) -> bool {
        self.0.is_some()
    }

    /// Fail before making a request that needs authentication.
    pub fn require(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(Error::AuthenticationRequired)
        }
    }

    /// Full header value (`Bearer <token>`), if any.
    pub(crate) fn value(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

// ---------------------------------------------------------------------------
// AuthState
// ---------------------------------------------------------------------------

/// Per-session token holder. Constructed at login, reset at logout.
pub struct AuthState {
    token: Mutex<Option<Zeroizing<String>>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(None),
        }
    }

    /// Adopt a freshly issued token and persist it best-effort; a keyring
    /// failure only costs session restore on the next launch.
    pub fn login(&self, token: &str) {
        if let Err(e) = storage::set_token(token) {
            warn!(error = %e, "failed to persist session token");
        }
        let mut guard = self.token.lock().unwrap();
        *guard = Some(Zeroizing::new(token.to_string()));
        info!("session authenticated");
    }

    /// Restore a persisted token from the credential store, if present.
    /// Returns whether a session was restored.
    pub fn restore(&self) -> bool {
        match storage::get_token() {
            Some(token) => {
                let mut guard = self.token.lock().unwrap();
                *guard = Some(Zeroizing::new(token));
                info!("session restored from credential store");
                true
            }
            None => false,
        }
    }

    /// Drop the in-memory token (zeroized) and delete the persisted copy.
    pub fn logout(&self) {
        if let Err(e) = storage::delete_token() {
            warn!(error = %e, "failed to delete persisted token");
        }
        let mut guard = self.token.lock().unwrap();
        *guard = None;
        info!("session logged out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.lock().unwrap().is_some()
    }

    /// Produce the header for the current session state.
    pub fn header(&self) -> AuthHeader {
        match self.token.lock().unwrap().as_ref() {
            Some(token) => AuthHeader::bearer(token),
            None => AuthHeader::anonymous(),
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}
