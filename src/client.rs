//! The request hook pipeline: the single place outbound requests cross.
//!
//! Mirrors the teacher's type-state client builder (`Unconfigured` ->
//! `Ready`) but collapses its `NoAuth` step, since this client has no
//! separate credential stage: a base URL is the only thing that must be
//! supplied before the client can send anything.

use crate::config::ClientSettings;
use crate::csrf::{self, CsrfState};
use crate::error::{Error, Result};
use crate::headers;
use crate::response::ApiResponse;
use crate::retry;
use crate::security;
use crate::server_type::{determine_server_type, ServerType};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

pub const PRODUCT_NAME: &str = "prefect";
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const API_VERSION: &str = "0.8.4";

#[derive(Debug)]
pub struct Unconfigured;
#[derive(Debug)]
pub struct Ready;

/// Fixed-at-construction client configuration: the base URL and the
/// header set composed once by [`crate::headers::compose`].
///
/// Unlike [`ClientSettings`] (re-read at the start of every request),
/// this is set once at build time and never changes for the life of
/// the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub headers: HeaderMap,
}

/// Type-state builder for [`Client`].
pub struct ClientBuilder<State = Unconfigured> {
    base_url: Option<Url>,
    settings: ClientSettings,
    timeout: Duration,
    _state: PhantomData<State>,
}

impl Default for ClientBuilder<Unconfigured> {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder<Unconfigured> {
    pub fn new() -> Self {
        Self {
            base_url: None,
            settings: ClientSettings::default(),
            timeout: Duration::from_secs(30),
            _state: PhantomData,
        }
    }

    /// Sets the control-plane base URL and transitions to the `Ready`
    /// state. The base URL should end in a trailing slash so relative
    /// paths (`csrf-token`, endpoint paths) join correctly.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Result<ClientBuilder<Ready>> {
        let url = Url::parse(base_url.as_ref()).map_err(|e| {
            Error::ConfigError(format!("invalid base URL '{}': {e}", base_url.as_ref()))
        })?;
        self.base_url = Some(url);
        Ok(ClientBuilder {
            base_url: self.base_url,
            settings: self.settings,
            timeout: self.timeout,
            _state: PhantomData,
        })
    }
}

impl ClientBuilder<Ready> {
    /// The prefix that, if `base_url` starts with it, classifies this
    /// client's server type as [`ServerType::Cloud`].
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

    /// Finalizes the client: composes headers, builds the underlying
    /// [`reqwest::Client`], and mints a fresh per-client CSRF identity.
    pub fn build(self) -> Result<Client> {
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

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Client {
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

/// Async control-plane client. Every outbound request passes through
/// [`Client::request`], which composes CSRF attachment, header
/// composition, and the retry policy into one pipeline.
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
    settings: ClientSettings,
    csrf_client_id: Uuid,
    csrf: Mutex<CsrfState>,
}

impl Client {
    pub fn builder() -> ClientBuilder<Unconfigured> {
        ClientBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Classifies the configured server, per [`crate::server_type`].
    pub fn server_type(&self) -> ServerType {
        determine_server_type(&self.settings)
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, path, None).await
    }

    /// The full outbound request pipeline: ensure a fresh CSRF token is
    /// attached for mutating methods, send under the retry policy, and
    /// recover once from a CSRF-invalid 403 with a fresh retry budget
    /// before surfacing any remaining error.
    pub async fn request(
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

        self.ensure_csrf_fresh(&method).await?;

        match self.send_with_retry(&method, &url, body).await {
            Ok(response) => ApiResponse::from_reqwest(response).await,
            Err(Error::Status {
                status, detail, ..
            }) if status == 403 && csrf::is_csrf_invalid_detail(detail.as_deref()) => {
                tracing::info!("CSRF token rejected as invalid; refreshing and resending once");
                self.invalidate_csrf().await;
                self.fetch_csrf_token().await?;
                let response = self.send_with_retry(&method, &url, body).await?;
                ApiResponse::from_reqwest(response).await
            }
            Err(e) => Err(e),
        }
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let csrf_headers = self.snapshot_csrf_headers().await?;
        let operation = format!("{method} {}", url.path());

        retry::execute_with_retry(&self.settings, &operation, move || {
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
        .await
    }

    /// Fetches a token if this is a mutating request, CSRF is still
    /// believed enabled, and no fresh token is already cached.
    async fn ensure_csrf_fresh(&self, method: &Method) -> Result<()> {
        if !csrf::is_mutating(method) {
            return Ok(());
        }

        let needs_fetch = {
            let state = self.csrf.lock().await;
            state.enabled && !state.is_fresh(Utc::now())
        };

        if needs_fetch {
            self.fetch_csrf_token().await?;
        }

        Ok(())
    }

    async fn fetch_csrf_token(&self) -> Result<()> {
        let url = csrf::token_url(&self.config.base_url, self.csrf_client_id)?;
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        match csrf::interpret_token_response(status, &body)? {
            csrf::FetchOutcome::Token(record) => {
                tracing::debug!(
                    token = %security::redact_token(&record.token),
                    "fetched a fresh CSRF token"
                );
                let mut state = self.csrf.lock().await;
                state.store(record);
            }
            csrf::FetchOutcome::ServerDisabled => {
                tracing::info!(
                    "Server does not support CSRF protection; disabling for this client."
                );
                let mut state = self.csrf.lock().await;
                state.disable();
            }
        }

        Ok(())
    }

    async fn invalidate_csrf(&self) {
        let mut state = self.csrf.lock().await;
        state.clear();
    }

    async fn snapshot_csrf_headers(&self) -> Result<Option<HeaderMap>> {
        let state = self.csrf.lock().await;
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

impl Drop for Client {
    fn drop(&mut self) {
        tracing::debug!(base_url = %self.config.base_url, "tearing down control-plane client");
    }
}
