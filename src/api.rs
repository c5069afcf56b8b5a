//! Campus services API client.
//!
//! Defines the [`RemoteClient`] seam the sync engine and order store talk
//! through, plus the reqwest-backed [`ApiClient`] used in production.
//! Responses are JSON; non-2xx statuses are mapped to typed errors with
//! whatever detail the server provided. Every request carries an explicit
//! timeout so a dead network surfaces as a retryable error instead of
//! hanging the polling loop.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::auth::AuthHeader;
use crate::error::{Error, Result};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// RemoteClient seam
// ---------------------------------------------------------------------------

/// Abstract JSON-over-HTTPS request function.
///
/// The only transport operation the rest of the crate needs: perform an
/// optionally authenticated request and hand back parsed JSON (or `Null`
/// for an empty 2xx body). Tests substitute an in-process double.
///
/// Declared in return-position `impl Trait` form so the future is `Send`
/// and callers can drive it from spawned tasks (the cart flusher runs on
/// the multi-threaded runtime). Implementations just write `async fn`.
pub trait RemoteClient {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        auth: &AuthHeader,
    ) -> impl std::future::Future<Output = Result<Value>> + Send;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the API base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into the crate taxonomy.
fn transport_error(url: &str, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        return Error::Timeout {
            url: url.to_string(),
        };
    }
    let detail = if err.is_connect() {
        "connection failed".to_string()
    } else if err.is_builder() {
        "invalid URL".to_string()
    } else {
        err.to_string()
    };
    Error::Network {
        url: url.to_string(),
        detail,
    }
}

/// Convert an HTTP status code into a user-friendly message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session token is invalid or expired".to_string(),
        403 => "Not authorized for this vendor".to_string(),
        404 => "Campus services endpoint not found".to_string(),
        s if s >= 500 => format!("Campus services server error (HTTP {s})"),
        s => format!("Unexpected response from campus services (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Production client
// ---------------------------------------------------------------------------

/// Reqwest-backed [`RemoteClient`] against the campus services API.
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = normalize_base_url(base_url);
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Network {
                url: base_url.clone(),
                detail: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl RemoteClient for ApiClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        auth: &AuthHeader,
    ) -> Result<Value> {
        let full_url = format!("{}{path}", self.base_url);
        debug!(%method, path, "api request");

        let mut req = self
            .client
            .request(method, &full_url)
            .header("Content-Type", "application/json");
        if let Some(header_value) = auth.value() {
            req = req.header("Authorization", header_value);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            // Preserve validation details from the server where present.
            let message = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| {
                    json.get("error")
                        .or_else(|| json.get("message"))
                        .and_then(Value::as_str)
                        .map(|s| s.to_string())
                })
                .unwrap_or_else(|| status_message(status));
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Empty 204-style responses come back as null.
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| Error::UnexpectedResponse(format!("invalid JSON: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
