//! Minimal JSON-over-HTTPS client shared by the provider API implementations.

use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors from a provider HTTP call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Connection, TLS or client-side timeout
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("Provider returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Response body was not JSON
    #[error("Failed to decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the provider said the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Authenticated JSON client for one provider base URL.
#[derive(Clone, Debug)]
pub struct JsonClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl JsonClient {
    /// Default request timeout when none is configured.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Build a client with rustls and a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Transport`] if the TLS backend cannot be initialised.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let timeout = if timeout.is_zero() { Self::DEFAULT_TIMEOUT } else { timeout };
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    /// `GET {base}{path}`
    ///
    /// # Errors
    ///
    /// See [`ProviderError`].
    pub async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        self.send(self.request(Method::GET, path)).await
    }

    /// `POST {base}{path}` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ProviderError`].
    pub async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Value, ProviderError> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    /// `DELETE {base}{path}`
    ///
    /// # Errors
    ///
    /// See [`ProviderError`].
    pub async fn delete(&self, path: &str) -> Result<Value, ProviderError> {
        self.send(self.request(Method::DELETE, path)).await
    }
}
