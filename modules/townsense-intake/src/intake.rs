//! The submission pipeline and the operations around it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use townsense_common::{
    Config, ContactMessage, Feedback, IntakeError, IssueType, Policy, Report, ReportStatus,
};
use townsense_store::{ImageStore, ReportStore, StoreError};

use crate::adapters::{
    Assessor, ChatAssessor, Detector, Geocoder, HttpDetector, NominatimGeocoder,
};
use crate::contact::validate_contact;
use crate::dedup::{DedupEngine, DedupOutcome};
use crate::normalizer::{check_location, clean_text, normalize, CandidateInput, MAX_NOTE_CHARS};
use crate::notify::{NotificationDispatcher, NotificationOutcome};
use crate::photo::{prepare_image, PreparedImage};

const ASSESS_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Long-lived capabilities shared by every request.
#[derive(Clone, TypedBuilder)]
pub struct IntakeDeps {
    pub detector: Arc<dyn Detector>,
    pub geocoder: Arc<dyn Geocoder>,
    #[builder(default)]
    pub assessor: Option<Arc<dyn Assessor>>,
    pub store: Arc<dyn ReportStore>,
    pub images: Arc<dyn ImageStore>,
    #[builder(default = Arc::new(NotificationDispatcher::disabled()))]
    pub dispatcher: Arc<NotificationDispatcher>,
    #[builder(default)]
    pub policy: Policy,
}

impl IntakeDeps {
    /// HTTP adapters and transports from configuration, over the given stores.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ReportStore>,
        images: Arc<dyn ImageStore>,
    ) -> Result<Self> {
        let assessor = config.assessor_api_key.as_deref().map(|key| {
            Arc::new(ChatAssessor::new(
                key,
                &config.assessor_base_url,
                &config.assessor_model,
            )) as Arc<dyn Assessor>
        });

        Ok(Self::builder()
            .detector(Arc::new(HttpDetector::new(&config.detector_url)))
            .geocoder(Arc::new(NominatimGeocoder::new(&config.geocoder_url)))
            .assessor(assessor)
            .store(store)
            .images(images)
            .dispatcher(Arc::new(NotificationDispatcher::from_config(&config.notify)?))
            .policy(config.policy)
            .build())
    }
}

/// One photo submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub image: Vec<u8>,
    pub lat: f64,
    pub lng: f64,
    pub note: Option<String>,
    pub submitter: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub outcome: DedupOutcome,
    /// Present only for created reports; merges notify nobody.
    pub notification: Option<NotificationOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackReceipt {
    pub feedback: Feedback,
    pub notification: NotificationOutcome,
}

pub struct Intake {
    deps: IntakeDeps,
    dedup: DedupEngine,
}

impl Intake {
    pub fn new(deps: IntakeDeps) -> Self {
        let dedup = DedupEngine::new(deps.store.clone(), deps.policy.duplicate_window);
        Self { deps, dedup }
    }

    pub fn policy(&self) -> &Policy {
        &self.deps.policy
    }

    /// Photo + location in, created-or-merged report out.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt, IntakeError> {
        let Submission {
            image,
            lat,
            lng,
            note,
            submitter,
            captured_at,
        } = submission;
        check_location(lat, lng)?;

        let prepared = tokio::task::spawn_blocking(move || prepare_image(&image))
            .await
            .map_err(|e| IntakeError::InvalidImage(format!("image preparation aborted: {e}")))??;

        let (detected, address) = tokio::join!(
            self.deps.detector.detect(&prepared.png),
            self.deps.geocoder.reverse_geocode(lat, lng),
        );
        let detections = detected.map_err(|e| IntakeError::DetectorUnavailable(e.to_string()))?;

        let mut candidate = normalize(
            CandidateInput {
                image_ref: prepared.reference.clone(),
                lat,
                lng,
                note,
                submitter,
                detections: detections.clone(),
                address,
                captured_at,
            },
            &self.deps.policy,
        )?;

        if let Some(assessor) = &self.deps.assessor {
            candidate.assessment =
                assess(assessor.as_ref(), &detections, &candidate, &prepared.png).await;
        }

        let outcome = self.dedup.evaluate(candidate).await?;
        let notification = match &outcome {
            DedupOutcome::Created { report } => {
                self.store_image(report, &prepared).await;
                Some(
                    self.deps
                        .dispatcher
                        .notify_created(report, Some(prepared.png.as_slice()))
                        .await,
                )
            }
            DedupOutcome::Merged { .. } => None,
        };

        Ok(SubmissionReceipt {
            outcome,
            notification,
        })
    }

    /// Only created reports keep their photo. A failed write leaves the
    /// report standing without one.
    async fn store_image(&self, report: &Report, prepared: &PreparedImage) {
        if let Err(e) = self
            .deps
            .images
            .put(&prepared.reference, &prepared.png)
            .await
        {
            warn!(report_id = %report.id, error = %e, "Image not stored, report kept without photo");
        }
    }

    /// Attach a feedback entry to a report and forward it once.
    pub async fn submit_feedback(
        &self,
        report_id: Uuid,
        note: &str,
        correction: Option<IssueType>,
    ) -> Result<FeedbackReceipt, IntakeError> {
        let note = clean_text("feedback", Some(note.to_string()), MAX_NOTE_CHARS)?
            .ok_or_else(|| IntakeError::Validation("feedback is required".into()))?;
        let report = self.get(report_id).await?;

        let feedback = Feedback {
            id: Uuid::new_v4(),
            report_id,
            note,
            correction,
            submitted_at: Utc::now(),
        };
        self.deps
            .store
            .add_feedback(&feedback)
            .await
            .map_err(store_error)?;
        info!(feedback_id = %feedback.id, report_id = %report_id, "Feedback recorded");

        let notification = self.deps.dispatcher.notify_feedback(&feedback, &report).await;
        Ok(FeedbackReceipt {
            feedback,
            notification,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Report, IntakeError> {
        self.deps
            .store
            .get(id)
            .await
            .map_err(store_error)?
            .ok_or(IntakeError::NotFound(id))
    }

    /// A submitter's reports, newest first.
    pub async fn history(
        &self,
        submitter: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Report>, IntakeError> {
        let submitter = submitter.trim();
        if submitter.is_empty() {
            return Err(IntakeError::Validation("submitter is required".into()));
        }
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        self.deps
            .store
            .list_by_submitter(submitter, limit)
            .await
            .map_err(store_error)
    }

    /// Delete every report filed by `submitter`, with their feedback.
    /// Returns how many reports were removed.
    pub async fn clear_history(&self, submitter: &str) -> Result<u64, IntakeError> {
        let submitter = submitter.trim();
        if submitter.is_empty() {
            return Err(IntakeError::Validation("submitter is required".into()));
        }
        let deleted = self
            .deps
            .store
            .delete_by_submitter(submitter)
            .await
            .map_err(store_error)?;
        info!(deleted, "Submitter history cleared");
        Ok(deleted)
    }

    pub async fn image(&self, reference: &str) -> Result<Option<Vec<u8>>, IntakeError> {
        if townsense_store::images::digest_of(reference).is_none() {
            return Ok(None);
        }
        self.deps
            .images
            .get(reference)
            .await
            .map_err(|e| IntakeError::StoreUnavailable(e.to_string()))
    }

    /// Authority action: close an open report as fixed.
    pub async fn resolve(&self, id: Uuid) -> Result<Report, IntakeError> {
        self.transition(id, ReportStatus::Resolved).await
    }

    /// Move a report out of `open`. Never goes backward; concurrent actions on
    /// the same report are settled by compare-and-set.
    pub async fn transition(&self, id: Uuid, to: ReportStatus) -> Result<Report, IntakeError> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(IntakeError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        match self
            .deps
            .store
            .transition_status(id, current.status, to, Utc::now())
            .await
        {
            Ok(()) => {
                info!(report_id = %id, from = %current.status, to = %to, "Report status changed");
                self.get(id).await
            }
            Err(StoreError::StatusConflict { current, .. }) => {
                Err(IntakeError::InvalidTransition { from: current, to })
            }
            Err(e) => Err(store_error(e)),
        }
    }

    /// Validate and forward a contact-form message. Unlike report
    /// notifications, a lost message is an error for the caller.
    pub async fn contact(&self, message: &ContactMessage) -> Result<NotificationOutcome, IntakeError> {
        let message = validate_contact(message)?;
        match self.deps.dispatcher.forward_contact(&message).await {
            NotificationOutcome::Failed { reason, .. } => {
                Err(IntakeError::NotificationFailed(reason))
            }
            NotificationOutcome::Skipped => Err(IntakeError::NotificationFailed(
                "contact channel not configured".into(),
            )),
            outcome => {
                info!(outcome = ?outcome, "Contact message forwarded");
                Ok(outcome)
            }
        }
    }
}

/// Optional and non-fatal: any failure leaves the report without an assessment.
async fn assess(
    assessor: &dyn Assessor,
    detections: &[townsense_common::Detection],
    candidate: &Report,
    image: &[u8],
) -> Option<String> {
    let call = assessor.assess(detections, &candidate.location, image);
    match tokio::time::timeout(ASSESS_TIMEOUT, call).await {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            warn!(error = %e, "Assessment failed, continuing without");
            None
        }
        Err(_) => {
            warn!("Assessment timed out, continuing without");
            None
        }
    }
}

fn store_error(e: StoreError) -> IntakeError {
    match e {
        StoreError::NotFound(id) => IntakeError::NotFound(id),
        other => IntakeError::StoreUnavailable(other.to_string()),
    }
}
