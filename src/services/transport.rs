use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Collector the agent uploads to unless configured otherwise.
pub const DEFAULT_ENDPOINT: &str = "https://ber-dom.sao.dom.my.id/telemetry";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("collector answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// One-shot delivery of a JSON payload. No retries: retry timing belongs to
/// the upload policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &str, payload: String) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, payload: String) -> Result<(), TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        // Only a plain 200 counts as delivered.
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
