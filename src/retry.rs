//! Retry policy engine: classification, backoff, and attempt accounting.
//!
//! The engine rebuilds the request for every attempt (via a closure)
//! rather than reusing a consumed [`reqwest::RequestBuilder`], and takes
//! its sleep primitive as a parameter so tests can replace real waiting
//! with an instrumented no-op without distorting the retry math itself.

use crate::config::ClientSettings;
use crate::error::{Error, Result};
use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    RequestBuilder, Response,
};
use std::future::Future;
use std::time::{Duration, SystemTime};

mod blocking_engine {
    use super::*;

    /// Blocking twin of [`super::execute_with_retry`], used by
    /// [`crate::sync_client::BlockingClient`]. Shares every classification
    /// and backoff helper with the async engine; only the transport call
    /// and the sleep are blocking.
    pub fn execute_with_retry_blocking<F>(
        settings: &ClientSettings,
        operation_name: &str,
        mut request_builder: F,
    ) -> Result<reqwest::blocking::Response>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut rng = fastrand::Rng::new();
        let mut attempts_used: u32 = 0;
        let mut attempt_index: u32 = 0;

        loop {
            attempt_index += 1;
            match request_builder().send() {
                Err(e) => {
                    if is_retryable_transport_error(&e) && attempts_used < settings.max_retries {
                        attempts_used += 1;
                        let delay =
                            exponential_delay(attempt_index, settings.retry_jitter_factor, &mut rng);
                        tracing::info!(
                            operation = operation_name,
                            attempt = attempts_used,
                            max_retries = settings.max_retries,
                            delay_secs = delay.as_secs_f64(),
                            "Encountered retryable exception during request ({}/{}): {}",
                            attempts_used,
                            settings.max_retries + 1,
                            e
                        );
                        std::thread::sleep(delay);
                        continue;
                    }
                    return Err(e.into());
                }
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let status_code = status.as_u16();
                    let maintenance = is_maintenance_response(response.headers());
                    let retryable = maintenance || settings.is_retryable_status(status_code);

                    if retryable && (maintenance || attempts_used < settings.max_retries) {
                        if !maintenance {
                            attempts_used += 1;
                        }

                        let delay = match parse_retry_after(response.headers()) {
                            Some(base) => apply_jitter(base, settings.retry_jitter_factor, &mut rng),
                            None => {
                                exponential_delay(attempt_index, settings.retry_jitter_factor, &mut rng)
                            }
                        };

                        tracing::info!(
                            operation = operation_name,
                            status = status_code,
                            attempt = attempts_used,
                            max_retries = settings.max_retries,
                            delay_secs = delay.as_secs_f64(),
                            maintenance,
                            "Received retryable status code {} ({}/{}), retrying in {:.2}s",
                            status_code,
                            attempts_used,
                            settings.max_retries + 1,
                            delay.as_secs_f64()
                        );

                        let _ = response.bytes();
                        std::thread::sleep(delay);
                        continue;
                    }

                    let body = response.text().unwrap_or_default();
                    return Err(Error::from_status_and_body(status_code, &body));
                }
            }
        }
    }
}

pub use blocking_engine::execute_with_retry_blocking;

/// Header a maintenance window uses to mark a response as cap-exempt.
pub const MAINTENANCE_HEADER: &str = "prefect-maintenance";

/// Runs `request_builder` under the retry policy, using `tokio::time::sleep`
/// for inter-attempt delays. This is the entry point used by the client.
pub async fn execute_with_retry<F>(
    settings: &ClientSettings,
    operation_name: &str,
    request_builder: F,
) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    execute_with_retry_and_sleeper(settings, operation_name, request_builder, |d| {
        tokio::time::sleep(d)
    })
    .await
}

/// Runs `request_builder` under the retry policy with an injectable async
/// sleep function, so tests can observe computed delays without waiting
/// for them in real time.
pub async fn execute_with_retry_and_sleeper<F, S, Fut>(
    settings: &ClientSettings,
    operation_name: &str,
    mut request_builder: F,
    mut sleeper: S,
) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
    S: FnMut(Duration) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut rng = fastrand::Rng::new();
    // Attempts charged against the cap; maintenance-marked responses
    // never increment this.
    let mut attempts_used: u32 = 0;
    // Total sends made, 1-based, used only for exponential-backoff math
    // and logging ("attempt k/(max_retries+1)").
    let mut attempt_index: u32 = 0;

    loop {
        attempt_index += 1;
        match request_builder().send().await {
            Err(e) => {
                if is_retryable_transport_error(&e) && attempts_used < settings.max_retries {
                    attempts_used += 1;
                    let delay = exponential_delay(attempt_index, settings.retry_jitter_factor, &mut rng);
                    tracing::info!(
                        operation = operation_name,
                        attempt = attempts_used,
                        max_retries = settings.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        "Encountered retryable exception during request ({}/{}): {}",
                        attempts_used,
                        settings.max_retries + 1,
                        e
                    );
                    sleeper(delay).await;
                    continue;
                }
                return Err(e.into());
            }
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let status_code = status.as_u16();
                let maintenance = is_maintenance_response(response.headers());
                let retryable = maintenance || settings.is_retryable_status(status_code);

                if retryable && (maintenance || attempts_used < settings.max_retries) {
                    if !maintenance {
                        attempts_used += 1;
                    }

                    let delay = match parse_retry_after(response.headers()) {
                        Some(base) => apply_jitter(base, settings.retry_jitter_factor, &mut rng),
                        None => exponential_delay(attempt_index, settings.retry_jitter_factor, &mut rng),
                    };

                    tracing::info!(
                        operation = operation_name,
                        status = status_code,
                        attempt = attempts_used,
                        max_retries = settings.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        maintenance,
                        "Received retryable status code {} ({}/{}), retrying in {:.2}s",
                        status_code,
                        attempts_used,
                        settings.max_retries + 1,
                        delay.as_secs_f64()
                    );

                    // Drain the body so the connection can be reused.
                    let _ = response.bytes().await;
                    sleeper(delay).await;
                    continue;
                }

                let body = response.text().await.unwrap_or_default();
                return Err(Error::from_status_and_body(status_code, &body));
            }
        }
    }
}

/// A response is retryable purely on status iff its code is in the
/// built-in set or `retry_extra_codes`, OR it carries the maintenance
/// marker (which is additionally cap-exempt).
pub fn is_maintenance_response(headers: &HeaderMap) -> bool {
    headers
        .get(MAINTENANCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Recognizes transport errors worth retrying: connect/read/write/protocol
/// errors and pool/read/connect timeouts. Everything else (e.g. a decode
/// error on the caller's own malformed request) propagates immediately.
pub fn is_retryable_transport_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

/// Parses `Retry-After` as either delta-seconds or an RFC 1123 HTTP-date,
/// returning `None` if the header is absent or unparseable.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let s = value.to_str().ok()?.trim();

    if let Ok(seconds) = s.parse::<f64>() {
        if seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
    }

    if let Ok(http_date) = httpdate::parse_http_date(s) {
        let now = SystemTime::now();
        return Some(http_date.duration_since(now).unwrap_or(Duration::ZERO));
    }

    None
}

/// Exponential backoff: `2 ** attempt_index` seconds, jittered.
fn exponential_delay(attempt_index: u32, jitter_factor: f64, rng: &mut fastrand::Rng) -> Duration {
    let base = 2f64.powi(attempt_index as i32);
    apply_jitter(Duration::from_secs_f64(base), jitter_factor, rng)
}

/// Multiplies `base` by a uniform factor in `[1.0, 1.0 + jitter_factor]`.
/// With `jitter_factor == 0.0` the delay is returned unchanged.
fn apply_jitter(base: Duration, jitter_factor: f64, rng: &mut fastrand::Rng) -> Duration {
    if jitter_factor <= 0.0 {
        return base;
    }
    let factor = 1.0 + rng.f64() * jitter_factor;
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}
