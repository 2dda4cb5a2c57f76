//! Centralized error type for the client.

use thiserror::Error;

/// Errors surfaced by the client.
///
/// Transient transport errors and retryable statuses are only ever seen
/// here after the retry budget (see [`crate::retry`]) is exhausted; CSRF
/// unavailability and single CSRF-invalid responses are recovered
/// internally and never reach this type.
#[derive(Error, Debug)]
pub enum Error {
    /// A transport-level error (connect/read/write/protocol/timeout) that
    /// survived every retry attempt.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A non-2xx response, either fatal on arrival or retried to exhaustion.
    #[error("request failed with status {status}: {message}")]
    Status {
        status: u16,
        message: String,
        detail: Option<String>,
    },

    /// Invalid configuration: a malformed base URL, header value, or
    /// configuration string (e.g. `retry_extra_codes`, `custom_headers`).
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// The overall per-request time budget was exhausted before a
    /// response could be obtained.
    #[error("timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a [`Error::Status`] from a response's status code and body,
    /// enriching the message with the body's `detail` field and any
    /// `extra_info[*].message` entries, as the control-plane API does.
    pub fn from_status_and_body(status: u16, body: &str) -> Self {
        let (detail, extra) = extract_detail_and_extra_info(body);

        let mut message = String::new();
        if let Some(d) = &detail {
            message.push_str(d);
        }
        for m in &extra {
            if !message.is_empty() {
                message.push_str("; ");
            }
            message.push_str(m);
        }
        if message.is_empty() {
            message = crate::security::elide(body, 2_000);
        }

        Error::Status {
            status,
            message,
            detail,
        }
    }
}

/// Pulls `detail` and `extra_info[*].message` out of a JSON (or
/// non-JSON) response body, matching the control plane's error envelope.
fn extract_detail_and_extra_info(body: &str) -> (Option<String>, Vec<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, Vec::new());
    };

    let detail = value
        .get("detail")
        .and_then(|d| d.as_str())
        .map(|s| s.to_string());

    let extra = value
        .get("extra_info")
        .and_then(|e| e.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("message").and_then(|m| m.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    (detail, extra)
}
