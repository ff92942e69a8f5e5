//! HTTP plumbing shared by the vendor clients: credential choice, error
//! classification, and SSE body reading.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use tracing::{error, warn};

use luna_core::config::ProviderConfig;
use luna_core::error::{LlmError, Result};
use luna_core::types::{Credential, ProviderId};
use luna_core::utils::truncate_string;

use crate::sse::{SseDecoder, SseEvent};

/// Message used for every flavour of "this model does not exist".
pub(crate) const MODEL_NOT_FOUND: &str = "model not found";

/// Longest slice of a raw error body kept in messages and logs.
const ERROR_BODY_LIMIT: usize = 500;

/// One vendor endpoint: a pooled client, its base URL, and the system key.
pub(crate) struct HttpEndpoint {
    provider: ProviderId,
    client: reqwest::Client,
    api_base: String,
    system_key: String,
    catalog: &'static [&'static str],
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("provider", &self.provider)
            .field("api_base", &self.api_base)
            .field("has_system_key", &self.has_system_key())
            .finish()
    }
}

impl HttpEndpoint {
    pub fn new(
        provider: ProviderId,
        config: &ProviderConfig,
        default_base: &str,
        catalog: &'static [&'static str],
    ) -> Self {
        // Resolve API base: config > vendor default
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| default_base.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(provider = %provider, error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            provider,
            client,
            api_base,
            system_key: config.api_key.trim().to_string(),
            catalog,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub fn catalog(&self) -> Vec<String> {
        self.catalog.iter().map(|m| m.to_string()).collect()
    }

    pub fn has_system_key(&self) -> bool {
        !self.system_key.is_empty()
    }

    /// The key for this call: a non-blank caller credential, else the system key.
    pub fn api_key<'a>(&'a self, credential: Option<&'a Credential>) -> Result<&'a str> {
        match credential {
            Some(c) if !c.is_blank() => Ok(c.expose().trim()),
            _ if self.has_system_key() => Ok(&self.system_key),
            _ => Err(LlmError::MissingCredential {
                provider: self.provider,
            }),
        }
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path))
    }

    pub fn call_failed(&self, model: &str, status: Option<u16>, message: impl Into<String>) -> LlmError {
        LlmError::ProviderCallFailed {
            provider: self.provider,
            model: model.to_string(),
            status,
            message: message.into(),
            available: self.catalog(),
        }
    }

    /// Send a request, turning transport failures and error statuses into
    /// [`LlmError::ProviderCallFailed`].
    pub async fn send(&self, request: reqwest::RequestBuilder, model: &str) -> Result<reqwest::Response> {
        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = %self.provider, model, error = %e, "HTTP request failed");
                return Err(self.call_failed(model, None, e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        error!(
            provider = %self.provider,
            model,
            status = %status,
            body = %truncate_string(&body, ERROR_BODY_LIMIT),
            "API error"
        );
        Err(self.call_failed(model, Some(status.as_u16()), classify_error(status, &body)))
    }

    /// Decode an SSE body, handing each event to `handle` until it returns
    /// `Ok(true)` (terminal event seen) or the body ends.
    pub async fn read_events<F>(&self, response: reqwest::Response, model: &str, mut handle: F) -> Result<()>
    where
        F: FnMut(SseEvent) -> Result<bool> + Send,
    {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(next) = body.next().await {
            let chunk: Bytes = next.map_err(|e| {
                error!(provider = %self.provider, model, error = %e, "Stream read failed");
                self.call_failed(model, None, e.to_string())
            })?;
            for event in decoder.push(&chunk) {
                if handle(event)? {
                    return Ok(());
                }
            }
        }

        if let Some(event) = decoder.finish() {
            handle(event)?;
        }
        Ok(())
    }
}

/// Pull the vendor's own message out of an error body. All three vendors
/// nest it under `error.message`.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| truncate_string(body.trim(), ERROR_BODY_LIMIT))
}

/// The vendor's message when a stream event is an error payload
/// (`{"error": {...}}`) rather than content.
pub(crate) fn stream_error(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let error = value.get("error").filter(|e| !e.is_null())?;
    let message = error["message"]
        .as_str()
        .or_else(|| error["status"].as_str())
        .map(String::from)
        .unwrap_or_else(|| truncate_string(&error.to_string(), ERROR_BODY_LIMIT));
    Some(if is_model_not_found(&message) {
        MODEL_NOT_FOUND.to_string()
    } else {
        message
    })
}

/// Whether a vendor message says the model does not exist.
pub(crate) fn is_model_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("model")
        && (lower.contains("not found")
            || lower.contains("not_found")
            || lower.contains("does not exist"))
}

fn classify_error(status: StatusCode, body: &str) -> String {
    let message = error_message(body);
    if status == StatusCode::NOT_FOUND || is_model_not_found(&message) {
        MODEL_NOT_FOUND.to_string()
    } else {
        message
    }
}
