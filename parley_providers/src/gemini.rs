use std::time::Duration;

use async_trait::async_trait;
use parley_core::{ServiceResponse, Transport, TransportError, WirePayload};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Transport for a `generateContent` style HTTP endpoint.
pub struct GeminiTransport {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiTransport {
    pub fn new(endpoint: String, timeout: Duration) -> anyhow::Result<Self> {
        info!("Creating GeminiTransport for {endpoint}");
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            api_key: None,
        })
    }

    /// Send the key with every request. Blank keys are ignored.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        if !api_key.trim().is_empty() {
            self.api_key = Some(api_key);
        }
        self
    }

    fn build_request(&self, payload: &WirePayload) -> RequestBuilder {
        let request = self.client.post(&self.endpoint).json(payload);
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key.as_str()),
            None => request,
        }
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn send(&self, payload: &WirePayload) -> Result<ServiceResponse, TransportError> {
        debug!(
            "Sending {} content blocks to {}",
            payload.contents.len(),
            self.endpoint
        );

        let response = self
            .build_request(payload)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        let response = into_response(status, &body)?;
        info!("Received response from generation service");
        Ok(response)
    }
}

/// Map a received status and body onto the transport result.
fn into_response(status: StatusCode, body: &str) -> Result<ServiceResponse, TransportError> {
    if !status.is_success() {
        warn!("Generation service returned {status}");
        return Err(TransportError::http(
            status.as_u16(),
            error_message(status, body),
        ));
    }

    let body: Value = serde_json::from_str(body).map_err(|e| {
        warn!("Generation service returned a body that is not JSON");
        TransportError::http(status.as_u16(), format!("Malformed response body: {e}"))
    })?;
    Ok(ServiceResponse::new(body))
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    let message = if e.is_timeout() {
        format!("Request timed out: {e}")
    } else if e.is_connect() {
        format!("Connection failed: {e}")
    } else if e.is_decode() {
        format!("Failed to read response body: {e}")
    } else {
        format!("Network error: {e}")
    };

    TransportError {
        status: e.status().map(|s| s.as_u16()),
        message,
    }
}

/// Pick the most useful message from an error response body.
fn error_message(status: StatusCode, body: &str) -> String {
    let service_message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string));
    if let Some(message) = service_message {
        return message;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
    }
}
