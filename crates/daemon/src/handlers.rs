//! HTTP task handlers
//!
//! Each configured task type is served by POSTing the job payload to a URL.
//! The receiving service does the actual work (order creation, tracking
//! number assignment and so on).

use async_trait::async_trait;
use courier_core::domain::JobPayload;
use courier_core::port::{HandlerError, HandlerResult, TaskHandler};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Response body characters kept in an error message
const ERROR_BODY_CHARS: usize = 200;

pub struct HttpTaskHandler {
    client: Client,
    url: String,
}

impl HttpTaskHandler {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TaskHandler for HttpTaskHandler {
    async fn handle(&self, payload: &JobPayload) -> HandlerResult {
        let response = self
            .client
            .post(&self.url)
            .json(payload.as_value())
            .send()
            .await
            .map_err(|e| transport_error(&self.url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HandlerError::retryable(format!("reading response from {}: {}", self.url, e)))?;
        debug!(url = %self.url, status = status.as_u16(), "Handler endpoint responded");

        if status.is_success() {
            return Ok(parse_body(&body));
        }

        let message = format!(
            "{} returned {}: {}",
            self.url,
            status,
            body.chars().take(ERROR_BODY_CHARS).collect::<String>()
        );
        if is_retryable_status(status) {
            Err(HandlerError::retryable(message))
        } else {
            Err(HandlerError::permanent(message))
        }
    }
}

/// Timeouts, throttling and server-side errors are worth another attempt
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn transport_error(url: &str, e: reqwest::Error) -> HandlerError {
    // A request that could not even be built will never succeed
    if e.is_builder() {
        HandlerError::permanent(format!("invalid request to {}: {}", url, e))
    } else {
        HandlerError::retryable(format!("request to {} failed: {}", url, e))
    }
}

/// JSON bodies are stored as-is, anything else as a string, empty as no result
fn parse_body(body: &str) -> Option<Value> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    Some(serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string())))
}
