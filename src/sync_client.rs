//! Blocking mirror of [`crate::client::Client`].
//!
//! Shares the retry engine, header composer, server-type classifier,
//! and CSRF state/protocol logic verbatim with the async client; only
//! the transport call and the inter-attempt sleep are blocking instead
//! of async.

use crate::config::ClientSettings;
use crate::csrf::{self, CsrfState};
use crate::error::{Error, Result};
use crate::headers;
use crate::response::ApiResponse;
use crate::retry;
use crate::security;
use crate::server_type::{determine_server_type, ServerType};
use chrono::Utc;
use reqwest::blocking::Response;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::client::{ClientConfig, PRODUCT_NAME, PRODUCT_VERSION, API_VERSION};

#[derive(Debug)]
pub struct Unconfigured;
#[derive(Debug)]
pub struct Ready;

pub struct BlockingClientBuilder<State = Unconfigured> {
    base_url: Option<Url>,
    settings: ClientSettings,
    timeout: Duration,
    _state: PhantomData<State>,
}

impl Default for BlockingClientBuilder<Unconfigured> {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingClientBuilder<Unconfigured> {
    pub fn new() -> Self {
        Self {
            base_url: None,
            settings: ClientSettings::default(),
            timeout: Duration::from_secs(30),
            _state: PhantomData,
        }
    }

    pub fn with_base_url(
        mut self,
        base_url: impl AsRef<str>,
    ) -> Result<BlockingClientBuilder<Ready>> {
        let url = Url::parse(base_url.as_ref()).map_err(|e| {
            Error::ConfigError(format!("invalid base URL '{}': {e}", base_url.as_ref()))
        })?;
        self.base_url = Some(url);
        Ok(BlockingClientBuilder {
            base_url: self.base_url,
            settings: self.settings,
            timeout: self.timeout,
            _state: PhantomData,
        })
    }
}

impl BlockingClientBuilder<Ready> {
    pub fn with_cloud_api_url(mut self, cloud_api_url: impl Into<String>) -> Self {
        self.settings.cloud_api_url = Some(cloud_api_url.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.settings.max_retries = max_retries;
        self
    }

    pub fn with_retry_jitter_factor(mut self, factor: f64) -> Self {
        self.settings.retry_jitter_factor = factor;
        self
    }

    pub fn with_retry_extra_codes(mut self, codes: HashSet<u16>) -> Self {
        self.settings.retry_extra_codes = codes;
        self
    }

    pub fn with_custom_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.settings.custom_headers = headers;
        self
    }

    pub fn with_allow_ephemeral_mode(mut self, allow: bool) -> Self {
        self.settings.allow_ephemeral_mode = allow;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<BlockingClient> {
        let base_url = self
            .base_url
            .expect("Ready state guarantees base_url is set");

        let mut settings = self.settings;
        settings.api_url = Some(base_url.to_string());

        let composed_headers = headers::compose(
            PRODUCT_NAME,
            PRODUCT_VERSION,
            API_VERSION,
            &settings.custom_headers,
        )?;

        let http = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(BlockingClient {
            http,
            config: ClientConfig {
                base_url,
                headers: composed_headers,
            },
            settings,
            csrf_client_id: Uuid::new_v4(),
            csrf: Mutex::new(CsrfState::default()),
        })
    }
}

/// Blocking twin of [`crate::client::Client`], for callers running
/// outside a `tokio` runtime.
pub struct BlockingClient {
    http: reqwest::blocking::Client,
    config: ClientConfig,
    settings: ClientSettings,
    csrf_client_id: Uuid,
    csrf: Mutex<CsrfState>,
}

impl BlockingClient {
    pub fn builder() -> BlockingClientBuilder<Unconfigured> {
        BlockingClientBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn server_type(&self) -> ServerType {
        determine_server_type(&self.settings)
    }

    pub fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::GET, path, None)
    }

    pub fn post(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::POST, path, Some(body))
    }

    pub fn put(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::PUT, path, Some(body))
    }

    pub fn patch(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::PATCH, path, Some(body))
    }

    pub fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, path, None)
    }

    /// Mirrors [`crate::client::Client::request`]'s contract exactly:
    /// same pipeline ordering, same typed [`ApiResponse`] wrapper on
    /// success, same one-shot CSRF-403 recovery.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse> {
        let url = self
            .config
            .base_url
            .join(path)
            .map_err(|e| Error::ConfigError(format!("invalid request path '{path}': {e}")))?;

        self.ensure_csrf_fresh(&method)?;

        match self.send_with_retry(&method, &url, body) {
            Ok(response) => ApiResponse::from_blocking(response),
            Err(Error::Status {
                status, detail, ..
            }) if status == 403 && csrf::is_csrf_invalid_detail(detail.as_deref()) => {
                tracing::info!("CSRF token rejected as invalid; refreshing and resending once");
                self.invalidate_csrf();
                self.fetch_csrf_token()?;
                let response = self.send_with_retry(&method, &url, body)?;
                ApiResponse::from_blocking(response)
            }
            Err(e) => Err(e),
        }
    }

    fn send_with_retry(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let csrf_headers = self.snapshot_csrf_headers()?;
        let operation = format!("{method} {}", url.path());

        retry::execute_with_retry_blocking(&self.settings, &operation, move || {
            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .headers(self.config.headers.clone());
            if let Some(headers) = &csrf_headers {
                builder = builder.headers(headers.clone());
            }
            if let Some(json_body) = body {
                builder = builder.json(json_body);
            }
            builder
        })
    }

    fn ensure_csrf_fresh(&self, method: &Method) -> Result<()> {
        if !csrf::is_mutating(method) {
            return Ok(());
        }

        let needs_fetch = {
            let state = self.csrf.lock().expect("csrf mutex poisoned");
            state.enabled && !state.is_fresh(Utc::now())
        };

        if needs_fetch {
            self.fetch_csrf_token()?;
        }

        Ok(())
    }

    fn fetch_csrf_token(&self) -> Result<()> {
        let url = csrf::token_url(&self.config.base_url, self.csrf_client_id)?;
        let response = self.http.get(url).send()?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();

        match csrf::interpret_token_response(status, &body)? {
            csrf::FetchOutcome::Token(record) => {
                tracing::debug!(
                    token = %security::redact_token(&record.token),
                    "fetched a fresh CSRF token"
                );
                let mut state = self.csrf.lock().expect("csrf mutex poisoned");
                state.store(record);
            }
            csrf::FetchOutcome::ServerDisabled => {
                tracing::info!(
                    "Server does not support CSRF protection; disabling for this client."
                );
                let mut state = self.csrf.lock().expect("csrf mutex poisoned");
                state.disable();
            }
        }

        Ok(())
    }

    fn invalidate_csrf(&self) {
        let mut state = self.csrf.lock().expect("csrf mutex poisoned");
        state.clear();
    }

    fn snapshot_csrf_headers(&self) -> Result<Option<HeaderMap>> {
        let state = self.csrf.lock().expect("csrf mutex poisoned");
        if !state.enabled {
            return Ok(None);
        }

        let Some(token) = state.token() else {
            return Ok(None);
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(csrf::CSRF_TOKEN_HEADER),
            HeaderValue::from_str(token)
                .map_err(|e| Error::ConfigError(format!("invalid CSRF token header value: {e}")))?,
        );
        headers.insert(
            HeaderName::from_static(csrf::CSRF_CLIENT_HEADER),
            HeaderValue::from_str(&self.csrf_client_id.to_string())
                .expect("a UUID is always a valid header value"),
        );
        Ok(Some(headers))
    }
}

impl Drop for BlockingClient {
    fn drop(&mut self) {
        tracing::debug!(base_url = %self.config.base_url, "tearing down blocking control-plane client");
    }
}
