use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl NotifyError {
    /// Whether another attempt could succeed. Bad messages and 4xx rejections
    /// (other than 429) fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Transport(_) => true,
            NotifyError::Rejected { status, .. } => *status == 429 || *status >= 500,
            NotifyError::InvalidMessage(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<EmailAttachment>,
}

/// Outbound email. One call is one delivery attempt.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError>;

    /// False for placeholder transports; the dispatcher skips those.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Outbound JSON webhook. One call is one delivery attempt.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn post(&self, payload: &serde_json::Value) -> Result<(), NotifyError>;

    fn is_configured(&self) -> bool {
        true
    }
}
