// Test mocks for the intake pipeline.
//
// One mock per trait boundary:
// - MockDetector (Detector) - fixed detections or a transport failure
// - MockGeocoder (Geocoder) - fixed address or a transport failure
// - MockAssessor (Assessor) - fixed markdown
// - RecordingEmail / RecordingWebhook - capture deliveries, optionally slow or flaky
// - UnavailableStore, ClosingStore, StaleTargetStore (ReportStore) - outages and races
//
// Plus fixtures for detections, reports and PNG bytes.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use townsense_common::{
    BoundingBox, Detection, Feedback, IssueType, Location, Policy, Report, ReportStatus,
};
use townsense_store::{
    InsertOutcome, MemoryImageStore, MemoryReportStore, ReportStore, StoreError,
};

use crate::adapters::{Assessor, Detector, DetectorError, GeocodeError, Geocoder};
use crate::intake::{Intake, IntakeDeps};
use crate::notify::{
    EmailTransport, NotificationDispatcher, NotifyError, OutboundEmail, RetryPolicy, WebhookSink,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn detection(label: &str, confidence: f64) -> Detection {
    Detection {
        label: label.to_string(),
        confidence,
        bbox: BoundingBox {
            x1: 10.0,
            y1: 10.0,
            x2: 100.0,
            y2: 80.0,
        },
        model: None,
    }
}

/// Open report created now with no address.
pub fn report_at(issue_type: IssueType, lat: f64, lng: f64) -> Report {
    let now = Utc::now();
    Report {
        id: Uuid::new_v4(),
        issue_type,
        label: issue_type.to_string(),
        location: Location {
            lat,
            lng,
            address: String::new(),
        },
        image_ref: "sha256:test".into(),
        confidence: 0.9,
        bbox: BoundingBox::default(),
        note: None,
        submitter: None,
        assessment: None,
        status: ReportStatus::Open,
        duplicate_count: 0,
        uniqueness_key: String::new(),
        created_at: now,
        updated_at: now,
        feedback: Vec::new(),
    }
}

/// Solid-colour PNG of the given size.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 90, 90]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode sample png");
    out.into_inner()
}

/// Retry policy with millisecond delays so tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

// ---------------------------------------------------------------------------
// MockDetector
// ---------------------------------------------------------------------------

pub struct MockDetector {
    detections: Vec<Detection>,
    fail: bool,
    calls: AtomicU32,
}

impl MockDetector {
    pub fn returning(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            detections: Vec::new(),
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for MockDetector {
    async fn detect(&self, _image: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DetectorError::Transport("connection refused".into()));
        }
        Ok(self.detections.clone())
    }
}

// ---------------------------------------------------------------------------
// MockGeocoder
// ---------------------------------------------------------------------------

pub struct MockGeocoder {
    address: Option<String>,
}

impl MockGeocoder {
    pub fn with_address(address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { address: None }
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn reverse_geocode(&self, _lat: f64, _lng: f64) -> Result<String, GeocodeError> {
        self.address
            .clone()
            .ok_or_else(|| GeocodeError::Transport("geocoder offline".into()))
    }
}

// ---------------------------------------------------------------------------
// MockAssessor
// ---------------------------------------------------------------------------

pub struct MockAssessor {
    text: Option<String>,
    image_lens: Mutex<Vec<usize>>,
}

impl MockAssessor {
    pub fn returning(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            image_lens: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            image_lens: Mutex::new(Vec::new()),
        }
    }

    /// Byte length of the photo passed to each call.
    pub fn image_lens(&self) -> Vec<usize> {
        self.image_lens.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Assessor for MockAssessor {
    async fn assess(
        &self,
        _detections: &[Detection],
        _location: &Location,
        image: &[u8],
    ) -> Result<String> {
        if let Ok(mut lens) = self.image_lens.lock() {
            lens.push(image.len());
        }
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => bail!("assessment service returned 500"),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording transports
// ---------------------------------------------------------------------------

/// Shared failure/latency knobs for the recording transports.
#[derive(Default)]
struct Behaviour {
    failures_left: AtomicU32,
    always_fail: bool,
    /// Fails every attempt with this permanent error.
    reject: Option<NotifyError>,
    delay: Duration,
    attempts: AtomicU32,
}

impl Behaviour {
    async fn attempt(&self) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(rejection) = &self.reject {
            return Err(rejection.clone());
        }
        if self.always_fail {
            return Err(NotifyError::Transport("smtp 421 service unavailable".into()));
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(NotifyError::Transport("temporary failure".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    behaviour: Behaviour,
    sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingEmail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.behaviour.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.behaviour.always_fail = true;
        self
    }

    /// Every send fails as an undeliverable message.
    pub fn rejecting(mut self) -> Self {
        self.behaviour.reject = Some(NotifyError::InvalidMessage(
            "recipient rejected: 550 no such user".into(),
        ));
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.behaviour.delay = delay;
        self
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> u32 {
        self.behaviour.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        self.behaviour.attempt().await?;
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    behaviour: Behaviour,
    posted: Mutex<Vec<serde_json::Value>>,
}

impl RecordingWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.behaviour.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.behaviour.always_fail = true;
        self
    }

    /// Every post is answered with `status`.
    pub fn rejecting(mut self, status: u16) -> Self {
        self.behaviour.reject = Some(NotifyError::Rejected {
            status,
            body: "rejected".into(),
        });
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.behaviour.delay = delay;
        self
    }

    pub fn posted(&self) -> Vec<serde_json::Value> {
        self.posted.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> u32 {
        self.behaviour.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookSink for RecordingWebhook {
    async fn post(&self, payload: &serde_json::Value) -> Result<(), NotifyError> {
        self.behaviour.attempt().await?;
        if let Ok(mut posted) = self.posted.lock() {
            posted.push(payload.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report stores with failure modes
// ---------------------------------------------------------------------------

fn down() -> StoreError {
    StoreError::Unavailable("down".into())
}

/// Every call fails as if the database were unreachable.
pub struct UnavailableStore;

#[async_trait]
impl ReportStore for UnavailableStore {
    async fn find_open_near(
        &self,
        _issue_type: IssueType,
        _lat: f64,
        _lng: f64,
        _radius_m: f64,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Report>, StoreError> {
        Err(down())
    }

    async fn insert_if_absent(
        &self,
        _report: &Report,
        _key: &str,
    ) -> Result<InsertOutcome, StoreError> {
        Err(down())
    }

    async fn increment_duplicate(&self, _id: Uuid, _at: DateTime<Utc>) -> Result<u32, StoreError> {
        Err(down())
    }

    async fn get(&self, _id: Uuid) -> Result<Option<Report>, StoreError> {
        Err(down())
    }

    async fn list_by_submitter(
        &self,
        _submitter: &str,
        _limit: usize,
    ) -> Result<Vec<Report>, StoreError> {
        Err(down())
    }

    async fn add_feedback(&self, _feedback: &Feedback) -> Result<(), StoreError> {
        Err(down())
    }

    async fn transition_status(
        &self,
        _id: Uuid,
        _from: ReportStatus,
        _to: ReportStatus,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn delete_by_submitter(&self, _submitter: &str) -> Result<u64, StoreError> {
        Err(down())
    }
}

/// Memory store that resolves each merge target right before incrementing
/// it, as an authority closing the report mid-submission would.
#[derive(Default)]
pub struct ClosingStore {
    pub inner: MemoryReportStore,
    closes: AtomicU32,
}

impl ClosingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportStore for ClosingStore {
    async fn find_open_near(
        &self,
        issue_type: IssueType,
        lat: f64,
        lng: f64,
        radius_m: f64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Report>, StoreError> {
        self.inner
            .find_open_near(issue_type, lat, lng, radius_m, since)
            .await
    }

    async fn insert_if_absent(
        &self,
        report: &Report,
        key: &str,
    ) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_if_absent(report, key).await
    }

    async fn increment_duplicate(&self, id: Uuid, at: DateTime<Utc>) -> Result<u32, StoreError> {
        if self
            .inner
            .transition_status(id, ReportStatus::Open, ReportStatus::Resolved, at)
            .await
            .is_ok()
        {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.increment_duplicate(id, at).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Report>, StoreError> {
        self.inner.get(id).await
    }

    async fn list_by_submitter(
        &self,
        submitter: &str,
        limit: usize,
    ) -> Result<Vec<Report>, StoreError> {
        self.inner.list_by_submitter(submitter, limit).await
    }

    async fn add_feedback(&self, feedback: &Feedback) -> Result<(), StoreError> {
        self.inner.add_feedback(feedback).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: ReportStatus,
        to: ReportStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.transition_status(id, from, to, at).await
    }

    async fn delete_by_submitter(&self, submitter: &str) -> Result<u64, StoreError> {
        self.inner.delete_by_submitter(submitter).await
    }
}

/// Keeps offering the same match, which is never open by the time it is
/// incremented. Nothing is ever written.
pub struct StaleTargetStore {
    ghost: Report,
    increments: AtomicU32,
    inserts: AtomicU32,
}

impl StaleTargetStore {
    pub fn new(ghost: Report) -> Self {
        Self {
            ghost,
            increments: AtomicU32::new(0),
            inserts: AtomicU32::new(0),
        }
    }

    pub fn increments(&self) -> u32 {
        self.increments.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> u32 {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportStore for StaleTargetStore {
    async fn find_open_near(
        &self,
        _issue_type: IssueType,
        _lat: f64,
        _lng: f64,
        _radius_m: f64,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Report>, StoreError> {
        Ok(vec![self.ghost.clone()])
    }

    async fn insert_if_absent(
        &self,
        report: &Report,
        _key: &str,
    ) -> Result<InsertOutcome, StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(InsertOutcome::Inserted(report.clone()))
    }

    async fn increment_duplicate(&self, id: Uuid, _at: DateTime<Utc>) -> Result<u32, StoreError> {
        self.increments.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::NotOpen(id))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<Report>, StoreError> {
        Ok(None)
    }

    async fn list_by_submitter(
        &self,
        _submitter: &str,
        _limit: usize,
    ) -> Result<Vec<Report>, StoreError> {
        Ok(Vec::new())
    }

    async fn add_feedback(&self, feedback: &Feedback) -> Result<(), StoreError> {
        Err(StoreError::NotFound(feedback.report_id))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        _from: ReportStatus,
        _to: ReportStatus,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(StoreError::NotFound(id))
    }

    async fn delete_by_submitter(&self, _submitter: &str) -> Result<u64, StoreError> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const AUTHORITY: &str = "city-works@example.org";

/// Intake wired to in-memory stores and recording transports.
pub struct Harness {
    pub intake: Arc<Intake>,
    pub store: Arc<MemoryReportStore>,
    pub images: Arc<MemoryImageStore>,
    pub email: Arc<RecordingEmail>,
    pub feedback_hook: Arc<RecordingWebhook>,
    pub contact_hook: Arc<RecordingWebhook>,
    pub detector: Arc<MockDetector>,
}

impl Harness {
    pub fn new(detector: MockDetector, geocoder: MockGeocoder) -> Self {
        Self::with_transports(
            detector,
            geocoder,
            RecordingEmail::new(),
            RecordingWebhook::new(),
            RecordingWebhook::new(),
        )
    }

    pub fn with_transports(
        detector: MockDetector,
        geocoder: MockGeocoder,
        email: RecordingEmail,
        feedback_hook: RecordingWebhook,
        contact_hook: RecordingWebhook,
    ) -> Self {
        let store = Arc::new(MemoryReportStore::new());
        let images = Arc::new(MemoryImageStore::new());
        let email = Arc::new(email);
        let feedback_hook = Arc::new(feedback_hook);
        let contact_hook = Arc::new(contact_hook);
        let detector = Arc::new(detector);

        let dispatcher = NotificationDispatcher::new(
            email.clone(),
            feedback_hook.clone(),
            contact_hook.clone(),
            Some(AUTHORITY.to_string()),
        )
        .with_retry(fast_retry(3))
        .with_deadline(Duration::from_millis(500));

        let deps = IntakeDeps::builder()
            .detector(detector.clone())
            .geocoder(Arc::new(geocoder))
            .store(store.clone())
            .images(images.clone())
            .dispatcher(Arc::new(dispatcher))
            .policy(Policy::default())
            .build();

        Self {
            intake: Arc::new(Intake::new(deps)),
            store,
            images,
            email,
            feedback_hook,
            contact_hook,
            detector,
        }
    }
}

/// Pothole-detecting intake over any report store, emailing through `email`.
pub fn intake_with_store(
    store: Arc<dyn ReportStore>,
    images: Arc<MemoryImageStore>,
    email: Arc<RecordingEmail>,
) -> Intake {
    let dispatcher = NotificationDispatcher::new(
        email,
        Arc::new(RecordingWebhook::new()),
        Arc::new(RecordingWebhook::new()),
        Some(AUTHORITY.to_string()),
    )
    .with_retry(fast_retry(3))
    .with_deadline(Duration::from_millis(500));

    Intake::new(
        IntakeDeps::builder()
            .detector(Arc::new(MockDetector::returning(vec![detection("pothole", 0.9)])))
            .geocoder(Arc::new(MockGeocoder::with_address("5th Avenue, New York")))
            .store(store)
            .images(images)
            .dispatcher(Arc::new(dispatcher))
            .policy(Policy::default())
            .build(),
    )
}
