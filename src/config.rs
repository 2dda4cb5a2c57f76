//! The read-at-request-time configuration surface.
//!
//! Unlike [`crate::client::ClientConfig`] (fixed at construction: base URL,
//! composed headers), [`ClientSettings`] is re-read at the start of every
//! request so each retry loop sees a single, consistent snapshot without
//! picking up a mid-flight configuration change.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Built-in retryable status codes, always retried regardless of
/// `retry_extra_codes`.
pub const BUILT_IN_RETRYABLE_STATUS_CODES: [u16; 4] = [408, 429, 502, 503];

/// The three header names a caller may never override via
/// `custom_headers`, compared case-insensitively.
pub const PROTECTED_HEADERS: [&str; 3] = [
    "user-agent",
    "prefect-csrf-token",
    "prefect-csrf-client",
];

/// Per-request configuration snapshot.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub max_retries: u32,
    pub retry_extra_codes: HashSet<u16>,
    pub retry_jitter_factor: f64,
    pub custom_headers: HashMap<String, String>,
    pub api_url: Option<String>,
    pub cloud_api_url: Option<String>,
    pub allow_ephemeral_mode: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_extra_codes: HashSet::new(),
            retry_jitter_factor: 0.2,
            custom_headers: HashMap::new(),
            api_url: None,
            cloud_api_url: None,
            allow_ephemeral_mode: false,
        }
    }
}

impl ClientSettings {
    /// Returns the full set of status codes that should be retried:
    /// the built-in set union'd with `retry_extra_codes`.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        BUILT_IN_RETRYABLE_STATUS_CODES.contains(&status) || self.retry_extra_codes.contains(&status)
    }

    /// Parses a comma-delimited list of status codes, e.g. `"508,409"`.
    /// Blank entries are ignored; a malformed entry is a configuration error.
    pub fn parse_retry_extra_codes(raw: &str) -> Result<HashSet<u16>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>().map_err(|e| {
                    Error::ConfigError(format!("invalid retry_extra_codes entry '{s}': {e}"))
                })
            })
            .collect()
    }

    /// Parses `custom_headers` when it arrives as a JSON-encoded object
    /// of string to string (e.g. sourced from an environment variable).
    pub fn parse_custom_headers_json(raw: &str) -> Result<HashMap<String, String>> {
        serde_json::from_str(raw).map_err(|e| {
            Error::ConfigError(format!("invalid custom_headers JSON: {e}"))
        })
    }
}
