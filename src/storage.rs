//! Bearer token persistence via the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS
//! Keychain, and on Linux the Secret Service API. The token is the only
//! durable state this crate keeps on the device; carts and orders live in
//! the remote store.

use keyring::Entry;
use tracing::warn;

const SERVICE_NAME: &str = "campusgo";
const KEY_AUTH_TOKEN: &str = "auth_token";

/// Retrieve the persisted session token. Returns `None` when the entry
/// does not exist (or the platform returns a "not found" error).
pub fn get_token() -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, KEY_AUTH_TOKEN) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(error = %e, "keyring: failed to read token");
            None
        }
    }
}

/// Store the session token.
pub fn set_token(value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, KEY_AUTH_TOKEN).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete the session token. Silently succeeds if the entry does not
/// exist.
pub fn delete_token() -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, KEY_AUTH_TOKEN).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}
