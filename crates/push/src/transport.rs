use std::time::Duration;

use async_trait::async_trait;
use postbox_core::protocol::MessageResponse;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Outbound delivery seam for the pusher. The production implementation
/// POSTs JSON over HTTP; tests substitute a scripted one.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Delivers the envelope and returns the endpoint's status code.
    async fn deliver(&self, url: &Url, envelope: &MessageResponse) -> Result<u16, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn deliver(&self, url: &Url, envelope: &MessageResponse) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .json(envelope)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}
