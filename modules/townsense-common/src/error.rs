use thiserror::Error;
use uuid::Uuid;

use crate::types::ReportStatus;

/// Failures a submission, feedback or authority action can surface to its caller.
///
/// Geocoding and notification failures are deliberately absent: they are
/// non-fatal and travel in receipts instead.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("no recognizable issue found, please retake photo")]
    NoIssueDetected,

    #[error("Detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid location: ({lat}, {lng})")]
    InvalidLocation { lat: f64, lng: f64 },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Report {0} not found")]
    NotFound(Uuid),

    #[error("Report cannot move from {from} to {to}")]
    InvalidTransition { from: ReportStatus, to: ReportStatus },

    #[error("Notification failed: {0}")]
    NotificationFailed(String),
}
