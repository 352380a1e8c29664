//! Delivery of report, feedback and contact notifications.
//!
//! Report and feedback notifications are spawned onto the runtime. The caller
//! waits at most the configured deadline; past it the caller gets `Deferred`
//! while the task keeps retrying in the background. A failed notification is
//! logged and reported, never rolled back into the report or feedback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use townsense_common::{ContactMessage, Feedback, NotifyConfig, Report};

use super::backend::{EmailAttachment, EmailTransport, NotifyError, OutboundEmail, WebhookSink};
use super::email::SmtpMailer;
use super::noop::NoopTransport;
use super::retry::{Delivery, RetryPolicy};
use super::webhook::HttpWebhook;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Delivered { attempts: u32 },
    /// Still running in the background after the deadline passed.
    Deferred,
    Failed { attempts: u32, reason: String },
    /// No transport configured for this kind of notification.
    Skipped,
}

impl From<Delivery> for NotificationOutcome {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Delivered { attempts } => NotificationOutcome::Delivered { attempts },
            Delivery::Failed { attempts, reason } => {
                NotificationOutcome::Failed { attempts, reason }
            }
        }
    }
}

pub struct NotificationDispatcher {
    email: Arc<dyn EmailTransport>,
    feedback_hook: Arc<dyn WebhookSink>,
    contact_hook: Arc<dyn WebhookSink>,
    authority_email: Option<String>,
    retry: RetryPolicy,
    deadline: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        email: Arc<dyn EmailTransport>,
        feedback_hook: Arc<dyn WebhookSink>,
        contact_hook: Arc<dyn WebhookSink>,
        authority_email: Option<String>,
    ) -> Self {
        let defaults = NotifyConfig::default();
        Self {
            email,
            feedback_hook,
            contact_hook,
            authority_email,
            retry: RetryPolicy::from_config(&defaults),
            deadline: defaults.timeout,
        }
    }

    /// Dispatcher that delivers nothing.
    pub fn disabled() -> Self {
        Self::new(
            Arc::new(NoopTransport),
            Arc::new(NoopTransport),
            Arc::new(NoopTransport),
            None,
        )
    }

    /// Real transports where configured, no-ops everywhere else.
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let email: Arc<dyn EmailTransport> = match (&config.smtp_host, &config.smtp_from) {
            (Some(host), Some(from)) => Arc::new(SmtpMailer::new(
                host,
                config.smtp_username.as_deref(),
                config.smtp_password.as_deref(),
                from,
            )?),
            _ => {
                warn!("SMTP_HOST or SMTP_FROM not set, authority emails disabled");
                Arc::new(NoopTransport)
            }
        };
        let webhook = |url: &Option<String>| -> Arc<dyn WebhookSink> {
            match url {
                Some(url) => Arc::new(HttpWebhook::new(url)),
                None => Arc::new(NoopTransport),
            }
        };

        Ok(Self::new(
            email,
            webhook(&config.feedback_webhook_url),
            webhook(&config.contact_webhook_url),
            config.authority_email.clone(),
        )
        .with_retry(RetryPolicy::from_config(config))
        .with_deadline(config.timeout))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Exactly one email to the authority for a newly created report, with
    /// the prepared photo attached when given.
    pub async fn notify_created(
        &self,
        report: &Report,
        photo: Option<&[u8]>,
    ) -> NotificationOutcome {
        let Some(to) = self.authority_email.clone() else {
            return NotificationOutcome::Skipped;
        };
        if !self.email.is_configured() {
            return NotificationOutcome::Skipped;
        }

        let email = authority_email(&to, report, photo);
        let transport = self.email.clone();
        let report_id = report.id;
        let outcome = self
            .spawn_with_deadline("authority email", move |_| {
                let transport = transport.clone();
                let email = email.clone();
                async move { transport.send(&email).await }
            })
            .await;
        info!(report_id = %report_id, outcome = ?outcome, "Authority notification");
        outcome
    }

    /// Exactly one webhook call per feedback entry.
    pub async fn notify_feedback(&self, feedback: &Feedback, report: &Report) -> NotificationOutcome {
        if !self.feedback_hook.is_configured() {
            return NotificationOutcome::Skipped;
        }

        let payload = feedback_payload(feedback, report);
        let hook = self.feedback_hook.clone();
        let feedback_id = feedback.id;
        let outcome = self
            .spawn_with_deadline("feedback webhook", move |_| {
                let hook = hook.clone();
                let payload = payload.clone();
                async move { hook.post(&payload).await }
            })
            .await;
        info!(feedback_id = %feedback_id, outcome = ?outcome, "Feedback notification");
        outcome
    }

    /// Forward a contact message, waiting for the final result. Nothing else
    /// keeps the message, so the caller needs to know when it was lost.
    pub async fn forward_contact(&self, message: &ContactMessage) -> NotificationOutcome {
        if !self.contact_hook.is_configured() {
            return NotificationOutcome::Skipped;
        }

        let payload = json!({
            "first_name": message.first_name,
            "last_name": message.last_name,
            "email": message.email,
            "message": message.message,
        });
        let hook = self.contact_hook.clone();
        self.retry
            .run("contact webhook", |_| {
                let hook = hook.clone();
                let payload = payload.clone();
                async move { hook.post(&payload).await }
            })
            .await
            .into()
    }

    async fn spawn_with_deadline<F, Fut>(&self, what: &'static str, op: F) -> NotificationOutcome
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), NotifyError>> + Send + 'static,
    {
        let retry = self.retry;
        let task = tokio::spawn(async move {
            let delivery = retry.run(what, op).await;
            if let Delivery::Failed { attempts, reason } = &delivery {
                warn!(what, attempts, reason = %reason, "NotificationFailed");
            }
            delivery
        });

        match tokio::time::timeout(self.deadline, task).await {
            Ok(Ok(delivery)) => delivery.into(),
            Ok(Err(join_error)) => NotificationOutcome::Failed {
                attempts: 0,
                reason: join_error.to_string(),
            },
            Err(_) => {
                info!(what, deadline_ms = self.deadline.as_millis() as u64, "Delivery deferred to background");
                NotificationOutcome::Deferred
            }
        }
    }
}

fn authority_email(to: &str, report: &Report, photo: Option<&[u8]>) -> OutboundEmail {
    let location = report.location.display_name();
    let mut body = format!(
        "A new urban issue has been reported.\n\n\
         Issue type: {}\n\
         Detected as: {}\n\
         Address: {}\n\
         Coordinates: {:.6}, {:.6}\n\
         Confidence: {:.1}%\n\
         Image: {}\n\
         Report ID: {}\n\
         Reported at: {}\n",
        report.issue_type,
        report.label,
        if report.location.address.is_empty() {
            "(unknown)"
        } else {
            report.location.address.as_str()
        },
        report.location.lat,
        report.location.lng,
        report.confidence * 100.0,
        report.image_ref,
        report.id,
        report.created_at.to_rfc3339(),
    );
    if let Some(note) = &report.note {
        body.push_str(&format!("\nNote from reporter:\n{note}\n"));
    }
    if let Some(assessment) = &report.assessment {
        body.push_str(&format!("\nAssessment:\n{assessment}\n"));
    }

    let attachment = photo.map(|bytes| EmailAttachment {
        filename: format!("report-{}.png", report.id),
        content_type: "image/png".to_string(),
        bytes: bytes.to_vec(),
    });
    if attachment.is_some() {
        body.push_str("\nPhoto attached.\n");
    }

    OutboundEmail {
        to: to.to_string(),
        subject: format!("New Urban Issue Report - {location}"),
        body,
        attachment,
    }
}

fn feedback_payload(feedback: &Feedback, report: &Report) -> serde_json::Value {
    json!({
        "feedback_id": feedback.id,
        "report_id": feedback.report_id,
        "note": feedback.note,
        "correction": feedback.correction,
        "submitted_at": feedback.submitted_at,
        "report": {
            "issue_type": report.issue_type,
            "status": report.status,
            "address": report.location.address,
        },
    })
}
