//! Helpers for keeping logs and error messages free of sensitive data.

/// Truncates `s` to at most `max` bytes, appending a marker with the
/// original length so elided logs/errors stay short but traceable.
pub fn elide(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}… ({} bytes total)", &s[..max], s.len())
    }
}

/// Redacts a CSRF token for logging, keeping only enough of it to
/// correlate log lines without leaking a value that is still valid.
pub fn redact_token(token: &str) -> String {
    if token.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}***", &token[..4])
    }
}
