use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::backend::{NotifyError, WebhookSink};

const POST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs JSON to a fixed URL.
pub struct HttpWebhook {
    url: String,
    http: reqwest::Client,
}

impl HttpWebhook {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn post(&self, payload: &serde_json::Value) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.url)
            .json(payload)
            .timeout(POST_TIMEOUT)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, body = %body, "Webhook returned non-success");
            return Err(NotifyError::Rejected { status, body });
        }

        Ok(())
    }
}
