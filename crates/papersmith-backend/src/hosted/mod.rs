//! HTTP plumbing shared by the hosted providers.
//!
//! Every request carries a per-request timeout and is wrapped in the
//! provider's [`RetryPolicy`]. Faults map onto [`BackendError`]:
//! connection failures, HTTP 429 and 5xx are transient; other statuses are
//! permanent; undecodable bodies are `InvalidResponse`.
//!
//! Credentials travel in headers only, and URLs are stripped from transport
//! errors before they are formatted.

pub mod gemini;
pub mod openai;

use std::time::Duration;

use papersmith_core::error::BackendError;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::retry::RetryPolicy;

pub(crate) fn build_client(backend: &str, timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::unavailable(backend, format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn map_reqwest_error(backend: &str, err: reqwest::Error, timeout: Duration) -> BackendError {
    let err = err.without_url();
    if err.is_timeout() {
        BackendError::timeout(backend, timeout)
    } else if err.is_connect() || err.is_request() {
        BackendError::transient(backend, format!("cannot reach provider: {}", err))
    } else {
        BackendError::unavailable(backend, err.to_string())
    }
}

pub(crate) fn map_status(backend: &str, status: StatusCode, body: &str) -> BackendError {
    let detail = provider_message(body).unwrap_or_else(|| body.chars().take(300).collect());
    let message = format!("HTTP {}: {}", status.as_u16(), detail);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        BackendError::transient(backend, message)
    } else {
        BackendError::unavailable(backend, message)
    }
}

/// Both providers wrap failures as `{"error": {"message": ...}}`.
fn provider_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error")?.get("message")?.as_str().map(str::to_string)
}

/// How a request authenticates with the provider.
#[derive(Clone, Copy)]
pub(crate) enum Auth<'a> {
    Bearer(&'a str),
    Header(&'static str, &'a str),
}

/// JSON POST with timeout and retries.
pub(crate) struct HttpJson {
    pub backend: String,
    pub client: reqwest::Client,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl HttpJson {
    pub fn new(backend: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self, BackendError> {
        let backend = backend.into();
        let client = build_client(&backend, timeout)?;
        Ok(Self { backend, client, timeout, retry })
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: Auth<'_>,
        body: &serde_json::Value,
    ) -> Result<T, BackendError> {
        self.retry.run(&self.backend, || self.post_once(url, auth, body)).await
    }

    async fn post_once<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: Auth<'_>,
        body: &serde_json::Value,
    ) -> Result<T, BackendError> {
        let request = match auth {
            Auth::Bearer(token) => self.client.post(url).bearer_auth(token),
            Auth::Header(name, value) => self.client.post(url).header(name, value),
        };
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&self.backend, e, self.timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(&self.backend, e, self.timeout))?;
        if !status.is_success() {
            return Err(map_status(&self.backend, status, &text));
        }
        debug!(backend = %self.backend, bytes = text.len(), "provider responded");
        serde_json::from_str(&text)
            .map_err(|e| BackendError::invalid_response(&self.backend, format!("undecodable body: {}", e)))
    }
}
