//! Shared REST plumbing for the platform adapters.

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::PlatformError;

/// Deadline for one outbound REST request, connect included.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A `reqwest` client whose requests give up after `timeout`.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Could not build HTTP client, using library defaults");
            reqwest::Client::new()
        })
}

#[derive(Clone)]
pub(crate) struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: &'static str,
    auth_value: String,
}

impl ApiClient {
    pub fn new(base_url: &str, auth_header: &'static str, auth_value: String) -> Self {
        Self::with_timeout(base_url, auth_header, auth_value, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        auth_header: &'static str,
        auth_value: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            auth_value,
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.auth_value.trim().is_empty()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header(self.auth_header, &self.auth_value)
            .header("User-Agent", "centrix-autofix")
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let resp = send(self.request(reqwest::Method::GET, path).query(query)).await?;
        decode(resp).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, PlatformError> {
        let resp = send(self.request(reqwest::Method::POST, path).json(body)).await?;
        decode(resp).await
    }

    /// POST where the platform answers with an empty body (e.g. 204).
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<(), PlatformError> {
        send(self.request(reqwest::Method::POST, path).json(body)).await?;
        Ok(())
    }

    pub async fn get_text(&self, path: &str) -> Result<String, PlatformError> {
        let resp = send(self.request(reqwest::Method::GET, path)).await?;
        resp.text()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))
    }

    /// Fetch a pre-signed absolute URL without platform credentials.
    pub async fn get_text_unauthenticated(&self, url: &str) -> Result<String, PlatformError> {
        let resp = send(self.client.get(url)).await?;
        resp.text()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))
    }
}

async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, PlatformError> {
    let resp = builder
        .send()
        .await
        .map_err(|e| PlatformError::Transient(e.to_string()))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 429 || status.is_server_error() {
        Err(PlatformError::Transient(format!("{status}: {body}")))
    } else {
        Err(PlatformError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, PlatformError> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| PlatformError::Transient(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| PlatformError::Malformed(e.to_string()))
}
