use async_trait::async_trait;
use tracing::debug;

use super::backend::{EmailTransport, NotifyError, OutboundEmail, WebhookSink};

/// Stand-in when no email or webhook target is configured.
pub struct NoopTransport;

#[async_trait]
impl EmailTransport for NoopTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        debug!(subject = %email.subject, "No email transport configured, dropping");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[async_trait]
impl WebhookSink for NoopTransport {
    async fn post(&self, _payload: &serde_json::Value) -> Result<(), NotifyError> {
        debug!("No webhook configured, dropping");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}
