//! A thin typed wrapper around a successful response.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// A response that has already cleared the retry policy and CSRF
/// recovery: its status is a success (or the caller otherwise chose to
/// accept it), so callers work with a plain typed wrapper rather than a
/// raw [`reqwest::Response`].
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: bytes::Bytes,
}

impl ApiResponse {
    pub(crate) async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Blocking twin of [`Self::from_reqwest`], used by
    /// [`crate::sync_client::BlockingClient`] so the sync twin returns the
    /// same typed wrapper the async client does (spec §4.F: "provides the
    /// same external contract as D").
    pub(crate) fn from_blocking(response: reqwest::blocking::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserializes the body as JSON, wrapping a parse failure as an
    /// [`Error::ConfigError`] since it signals an API/client contract
    /// mismatch rather than a transport or status failure.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::ConfigError(format!("failed to decode response body: {e}")))
    }
}
