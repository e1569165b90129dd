// Thin HTTP clients for the Lease Manager and Task Dispatcher, used by the
// inspection commands. Each non-2xx response is decoded as the services'
// `{"error": {"code", "message", "retryable"}}` envelope and surfaced as an
// `HttpStatusError` so `exit_code::ExitCode::from_error` can classify it.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::exit_code::HttpStatusError;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// A minimal REST client bound to one service's base URL.
#[derive(Clone)]
pub struct ServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        decode(response).await
    }

    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let response = self
            .client
            .delete(format!("{}{path}", self.base_url))
            .send()
            .await
            .with_context(|| format!("DELETE {path} failed"))?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
    let status = response.status();
    let bytes = response.bytes().await.context("failed to read response body")?;

    if status.is_success() {
        return serde_json::from_slice(&bytes).context("failed to decode response body");
    }

    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&bytes) {
        return Err(anyhow::Error::new(HttpStatusError {
            code: envelope.error.code,
            message: envelope.error.message,
        }));
    }

    anyhow::bail!("request failed with status {status}: {}", String::from_utf8_lossy(&bytes))
}
