//! HTTP transport over `reqwest`.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ApiSettings;

use super::{Method, Request, Transport, TransportError, TransportResult};

/// Sends requests to the backend rooted at `base_url`.
///
/// Timeouts are enforced by the underlying client; a timed-out request
/// produces no response and is classified as disconnected.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn from_settings(settings: &ApiSettings) -> Result<Self, reqwest::Error> {
        Self::new(settings.base_url.clone(), settings.timeout())
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: Request, cancel: CancellationToken) -> BoxFuture<'static, TransportResult> {
        let client = self.client.clone();
        let url = self.url(&request.path);

        Box::pin(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(%request, "Request cancelled before completion");
                    Err(TransportError::cancelled())
                }
                result = send(client, url, request.clone()) => result,
            }
        })
    }
}

const fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

async fn send(client: reqwest::Client, url: String, request: Request) -> TransportResult {
    let mut builder = client.request(method(request.method), &url);
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(%request, error = %e, "No response from server");
            return Err(TransportError::disconnected());
        }
    };

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| TransportError::decode(status.as_u16(), e.to_string()))?;

    if !status.is_success() {
        tracing::debug!(%request, status = status.as_u16(), "Server returned an error status");
        return Err(TransportError::server(status.as_u16(), Some(text)));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| TransportError::decode(status.as_u16(), e.to_string()))
}
