//! Builds the fixed header set a client sends on every request.

use crate::config::PROTECTED_HEADERS;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONNECTION, USER_AGENT};
use std::collections::HashMap;
use std::str::FromStr;

/// Builds the final header set for a client: library defaults, a
/// `User-Agent` identifying the product, and any surviving user
/// `custom_headers`.
///
/// `custom_headers` entries whose name matches [`PROTECTED_HEADERS`]
/// (case-insensitively) are dropped with a `tracing::warn!`; everything
/// else is added, with its value preserved exactly.
///
/// Known deviation: the spec asks for the surviving header *name* to keep
/// the caller's original casing on the wire. `HeaderName` (from the `http`
/// crate, which `reqwest` builds on) always normalizes field names to
/// lowercase at construction time — this is intentional upstream behavior,
/// not a bug, since HTTP/2 mandates lowercase header names (RFC 7540
/// §8.1.2) and HTTP/1.1 header names are case-insensitive on the wire
/// either way (RFC 9110 §5.1). There is no supported `reqwest`/`http` API
/// that can hold or send a non-lowercase header name, so this requirement
/// is unsatisfiable without dropping down to raw socket writes, which
/// would mean abandoning `reqwest` as the transport. Callers only ever
/// observe header names case-insensitively (as every HTTP implementation
/// must), so this has no observable effect in practice; it is recorded as
/// an accepted deviation in `DESIGN.md`.
pub fn compose(
    product: &str,
    product_version: &str,
    api_version: &str,
    custom_headers: &HashMap<String, String>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let user_agent = format!("{product}/{product_version} (API {api_version})");
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent)
            .map_err(|e| Error::ConfigError(format!("invalid User-Agent value: {e}")))?,
    );

    for (name, value) in custom_headers {
        if is_protected(name) {
            tracing::warn!(
                header = %name,
                "Custom header '{name}' ignored because it conflicts with a reserved header."
            );
            continue;
        }

        let header_name = HeaderName::from_str(name)
            .map_err(|e| Error::ConfigError(format!("invalid custom header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| Error::ConfigError(format!("invalid custom header value for '{name}': {e}")))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Whether `name` matches a protected header, case-insensitively.
pub fn is_protected(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PROTECTED_HEADERS.contains(&lower.as_str())
}
