//! Dispatcher behaviour: retry bound, deadline hand-off, exactly-once delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use townsense_common::{Feedback, IssueType};
use townsense_intake::notify::NoopTransport;
use townsense_intake::testing::{
    fast_retry, report_at, sample_png, RecordingEmail, RecordingWebhook,
};
use townsense_intake::{NotificationDispatcher, NotificationOutcome};

fn dispatcher(
    email: Arc<RecordingEmail>,
    feedback_hook: Arc<RecordingWebhook>,
    deadline: Duration,
) -> NotificationDispatcher {
    NotificationDispatcher::new(
        email,
        feedback_hook,
        Arc::new(NoopTransport),
        Some("city@example.org".into()),
    )
    .with_retry(fast_retry(3))
    .with_deadline(deadline)
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let email = Arc::new(RecordingEmail::new().failing_first(2));
    let d = dispatcher(email.clone(), Arc::new(RecordingWebhook::new()), Duration::from_secs(2));

    let outcome = d.notify_created(&report_at(IssueType::Pothole, 40.0, -73.0), None).await;

    assert_eq!(outcome, NotificationOutcome::Delivered { attempts: 3 });
    assert_eq!(email.attempts(), 3);
    assert_eq!(email.sent().len(), 1);
}

#[tokio::test]
async fn retry_stops_at_max_attempts() {
    let email = Arc::new(RecordingEmail::new().always_failing());
    let d = dispatcher(email.clone(), Arc::new(RecordingWebhook::new()), Duration::from_secs(2));

    let outcome = d.notify_created(&report_at(IssueType::Pothole, 40.0, -73.0), None).await;

    assert!(matches!(
        outcome,
        NotificationOutcome::Failed { attempts: 3, ref reason } if reason.contains("421")
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(email.attempts(), 3);
    assert!(email.sent().is_empty());
}

#[tokio::test]
async fn undeliverable_email_is_not_retried() {
    let email = Arc::new(RecordingEmail::new().rejecting());
    let d = dispatcher(email.clone(), Arc::new(RecordingWebhook::new()), Duration::from_secs(2));

    let outcome = d.notify_created(&report_at(IssueType::Pothole, 40.0, -73.0), None).await;

    assert!(matches!(
        outcome,
        NotificationOutcome::Failed { attempts: 1, ref reason } if reason.contains("550")
    ));
    assert_eq!(email.attempts(), 1);
}

#[tokio::test]
async fn webhook_client_error_is_not_retried() {
    let hook = Arc::new(RecordingWebhook::new().rejecting(404));
    let d = dispatcher(Arc::new(RecordingEmail::new()), hook.clone(), Duration::from_secs(2));
    let report = report_at(IssueType::Graffiti, 40.0, -73.0);
    let feedback = Feedback {
        id: Uuid::new_v4(),
        report_id: report.id,
        note: "mural, not graffiti".into(),
        correction: Some(IssueType::Other),
        submitted_at: Utc::now(),
    };

    let outcome = d.notify_feedback(&feedback, &report).await;

    assert!(matches!(outcome, NotificationOutcome::Failed { attempts: 1, .. }));
    assert_eq!(hook.attempts(), 1);
    assert!(hook.posted().is_empty());
}

#[tokio::test]
async fn photo_travels_with_the_authority_email() {
    let email = Arc::new(RecordingEmail::new());
    let d = dispatcher(email.clone(), Arc::new(RecordingWebhook::new()), Duration::from_secs(2));
    let photo = sample_png(40, 30);

    d.notify_created(&report_at(IssueType::Pothole, 40.0, -73.0), Some(photo.as_slice()))
        .await;

    let sent = email.sent();
    let attachment = sent[0].attachment.as_ref().unwrap();
    assert_eq!(attachment.content_type, "image/png");
    assert_eq!(attachment.bytes, photo);
}

#[tokio::test]
async fn slow_transport_is_deferred_and_still_delivers() {
    let email = Arc::new(RecordingEmail::new().slow(Duration::from_millis(150)));
    let d = dispatcher(email.clone(), Arc::new(RecordingWebhook::new()), Duration::from_millis(20));

    let outcome = d.notify_created(&report_at(IssueType::Graffiti, 40.0, -73.0), None).await;
    assert_eq!(outcome, NotificationOutcome::Deferred);
    assert!(email.sent().is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(email.sent().len(), 1);
    assert_eq!(email.attempts(), 1);
}

#[tokio::test]
async fn each_feedback_entry_posts_exactly_once() {
    let hook = Arc::new(RecordingWebhook::new().failing_first(1));
    let d = dispatcher(Arc::new(RecordingEmail::new()), hook.clone(), Duration::from_secs(2));
    let report = report_at(IssueType::OverflowingBin, 40.0, -73.0);

    for note in ["bin is overflowing again", "collected today"] {
        let feedback = Feedback {
            id: Uuid::new_v4(),
            report_id: report.id,
            note: note.into(),
            correction: None,
            submitted_at: Utc::now(),
        };
        let outcome = d.notify_feedback(&feedback, &report).await;
        assert!(matches!(outcome, NotificationOutcome::Delivered { .. }));
    }

    let posted = hook.posted();
    assert_eq!(posted.len(), 2);
    assert_eq!(posted[0]["note"], "bin is overflowing again");
    assert_eq!(posted[1]["note"], "collected today");
    assert_eq!(posted[0]["report"]["issue_type"], "overflowing-bin");
}

#[tokio::test]
async fn missing_authority_address_skips_email() {
    let email = Arc::new(RecordingEmail::new());
    let d = NotificationDispatcher::new(
        email.clone(),
        Arc::new(NoopTransport),
        Arc::new(NoopTransport),
        None,
    );

    let outcome = d.notify_created(&report_at(IssueType::Pothole, 1.0, 1.0), None).await;

    assert_eq!(outcome, NotificationOutcome::Skipped);
    assert_eq!(email.attempts(), 0);
}
