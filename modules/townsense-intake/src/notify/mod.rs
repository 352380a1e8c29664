pub mod backend;
pub mod dispatcher;
pub mod email;
pub mod noop;
pub mod retry;
pub mod webhook;

pub use backend::{EmailAttachment, EmailTransport, NotifyError, OutboundEmail, WebhookSink};
pub use dispatcher::{NotificationDispatcher, NotificationOutcome};
pub use email::SmtpMailer;
pub use noop::NoopTransport;
pub use retry::{Delivery, RetryPolicy};
pub use webhook::HttpWebhook;
