//! CSRF token lifecycle: fetch, freshness, attachment, and recovery.
//!
//! The mutable parts of this component (the stored token and its
//! expiration, and whether CSRF support is still enabled for this
//! client) live in [`CsrfState`], which both the async [`crate::client`]
//! and the blocking [`crate::sync_client`] guard behind their own mutex
//! flavor. Everything in this module besides the network fetch itself is
//! concurrency-neutral and shared verbatim between the two transports.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

// Lowercase: reqwest's `HeaderName::from_static` requires a literal
// already in normalized form, though HTTP header matching stays
// case-insensitive on the wire.
pub const CSRF_TOKEN_HEADER: &str = "prefect-csrf-token";
pub const CSRF_CLIENT_HEADER: &str = "prefect-csrf-client";

const CSRF_DISABLED_DETAIL: &str = "CSRF protection is disabled.";
const CSRF_INVALID_DETAIL: &str = "Invalid CSRF token or client identifier.";

/// The immutable record returned by a successful CSRF token fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct CsrfTokenRecord {
    #[allow(dead_code)]
    pub client: String,
    pub token: String,
    pub expiration: DateTime<Utc>,
}

/// Mutable per-client CSRF state: a token and its expiration are either
/// both present or both absent, and `enabled` latches permanently false
/// once the server is found to be CSRF-unaware.
#[derive(Debug, Clone)]
pub struct CsrfState {
    token: Option<CsrfTokenRecord>,
    pub enabled: bool,
}

impl Default for CsrfState {
    fn default() -> Self {
        Self {
            token: None,
            enabled: true,
        }
    }
}

impl CsrfState {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.token.as_ref().is_some_and(|t| now < t.expiration)
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.token.as_str())
    }

    pub fn store(&mut self, record: CsrfTokenRecord) {
        self.token = Some(record);
    }

    pub fn clear(&mut self) {
        self.token = None;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.token = None;
    }
}

/// Whether `method` is one of the state-changing methods CSRF guards.
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Outcome of a CSRF token fetch, shared by both transports.
pub enum FetchOutcome {
    Token(CsrfTokenRecord),
    ServerDisabled,
}

/// Builds the `GET {base}/csrf-token?client=<id>` URL.
pub fn token_url(base_url: &Url, client_id: Uuid) -> Result<Url> {
    let mut url = base_url
        .join("csrf-token")
        .map_err(|e| Error::ConfigError(format!("invalid base URL for CSRF endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client", &client_id.to_string());
    Ok(url)
}

/// Interprets a CSRF-endpoint response (status + body) as either a fresh
/// token, a server-disabled signal (404, or 422 with the disabled
/// detail), or a fatal status error.
pub fn interpret_token_response(status: u16, body: &str) -> Result<FetchOutcome> {
    if status == 200 {
        let record: CsrfTokenRecord = serde_json::from_str(body)
            .map_err(|e| Error::ConfigError(format!("invalid CSRF token response: {e}")))?;
        return Ok(FetchOutcome::Token(record));
    }

    if status == 404 {
        return Ok(FetchOutcome::ServerDisabled);
    }

    if status == 422 && response_detail(body).as_deref() == Some(CSRF_DISABLED_DETAIL) {
        return Ok(FetchOutcome::ServerDisabled);
    }

    Err(Error::from_status_and_body(status, body))
}

/// Whether a 403 response is the specific "invalid CSRF token or client
/// identifier" signal that triggers one-shot refresh-and-resend, as
/// opposed to an unrelated 403.
pub fn is_csrf_invalid_response(status: u16, body: &str) -> bool {
    status == 403 && is_csrf_invalid_detail(response_detail(body).as_deref())
}

/// Same check as [`is_csrf_invalid_response`] but against an already
/// extracted `detail` field, for callers (the request pipeline) that
/// only have the already-parsed [`crate::error::Error::Status`] to work
/// with rather than a raw body.
pub fn is_csrf_invalid_detail(detail: Option<&str>) -> bool {
    detail == Some(CSRF_INVALID_DETAIL)
}

fn response_detail(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("detail")?
        .as_str()
        .map(str::to_string)
}
