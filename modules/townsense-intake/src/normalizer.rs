//! Turns detector output, geocoder output and user input into a candidate report.
//!
//! Nothing here touches the network or the store; the only side effect is a
//! warning when geocoding failed.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use townsense_common::{
    valid_coordinates, Detection, IntakeError, IssueType, Location, Policy, Report, ReportStatus,
};

use crate::adapters::GeocodeError;

pub const MAX_NOTE_CHARS: usize = 2000;
pub const MAX_SUBMITTER_CHARS: usize = 100;

/// Everything the normalizer needs for one submission.
#[derive(Debug)]
pub struct CandidateInput {
    pub image_ref: String,
    pub lat: f64,
    pub lng: f64,
    pub note: Option<String>,
    pub submitter: Option<String>,
    pub detections: Vec<Detection>,
    pub address: Result<String, GeocodeError>,
    pub captured_at: DateTime<Utc>,
}

/// Strongest detection at or above `min_confidence`. Ties keep the first reported.
pub fn select_detection(detections: &[Detection], min_confidence: f64) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.confidence >= min_confidence)
        .fold(None, |best: Option<&Detection>, d| match best {
            Some(b) if b.confidence >= d.confidence => Some(b),
            _ => Some(d),
        })
}

pub fn check_location(lat: f64, lng: f64) -> Result<(), IntakeError> {
    if valid_coordinates(lat, lng) {
        Ok(())
    } else {
        Err(IntakeError::InvalidLocation { lat, lng })
    }
}

/// Trim; empty becomes absent; over `max_chars` is rejected.
pub fn clean_text(
    field: &str,
    value: Option<String>,
    max_chars: usize,
) -> Result<Option<String>, IntakeError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max_chars {
        return Err(IntakeError::Validation(format!(
            "{field} exceeds {max_chars} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

/// Build the unsaved candidate report for a submission.
pub fn normalize(input: CandidateInput, policy: &Policy) -> Result<Report, IntakeError> {
    check_location(input.lat, input.lng)?;
    let note = clean_text("note", input.note, MAX_NOTE_CHARS)?;
    let submitter = clean_text("submitter", input.submitter, MAX_SUBMITTER_CHARS)?;

    let detection = select_detection(&input.detections, policy.min_confidence)
        .ok_or(IntakeError::NoIssueDetected)?;

    let address = match input.address {
        Ok(address) => address,
        Err(e) => {
            warn!(lat = input.lat, lng = input.lng, error = %e, "GeocodeFailed, keeping raw coordinates");
            String::new()
        }
    };

    Ok(Report {
        id: Uuid::new_v4(),
        issue_type: IssueType::from_label(&detection.label),
        label: detection.label.clone(),
        location: Location {
            lat: input.lat,
            lng: input.lng,
            address,
        },
        image_ref: input.image_ref,
        confidence: detection.confidence,
        bbox: detection.bbox,
        note,
        submitter,
        assessment: None,
        status: ReportStatus::Open,
        duplicate_count: 0,
        uniqueness_key: String::new(),
        created_at: input.captured_at,
        updated_at: input.captured_at,
        feedback: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::detection;

    fn input(detections: Vec<Detection>) -> CandidateInput {
        CandidateInput {
            image_ref: "sha256:ab".into(),
            lat: 40.0,
            lng: -73.0,
            note: Some("  big one near the curb  ".into()),
            submitter: None,
            detections,
            address: Ok("5th Avenue, New York".into()),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn picks_highest_confidence_above_threshold() {
        let report = normalize(
            input(vec![detection("Garbage", 0.5), detection("pothole", 0.85)]),
            &Policy::default(),
        )
        .unwrap();

        assert_eq!(report.issue_type, IssueType::Pothole);
        assert_eq!(report.label, "pothole");
        assert_eq!(report.confidence, 0.85);
        assert_eq!(report.status, ReportStatus::Open);
        assert_eq!(report.duplicate_count, 0);
        assert_eq!(report.note.as_deref(), Some("big one near the curb"));
    }

    #[test]
    fn ties_keep_the_first_reported() {
        let detections = vec![detection("graffiti", 0.7), detection("pothole", 0.7)];
        assert_eq!(select_detection(&detections, 0.4).unwrap().label, "graffiti");
    }

    #[test]
    fn threshold_is_inclusive() {
        let detections = vec![detection("pothole", 0.4)];
        assert!(select_detection(&detections, 0.4).is_some());
        assert!(select_detection(&detections, 0.41).is_none());
    }

    #[test]
    fn low_confidence_is_no_issue() {
        let err = normalize(input(vec![detection("pothole", 0.2)]), &Policy::default()).unwrap_err();
        assert!(matches!(err, IntakeError::NoIssueDetected));
        assert_eq!(
            err.to_string(),
            "no recognizable issue found, please retake photo"
        );
    }

    #[test]
    fn geocode_failure_keeps_raw_coordinates() {
        let mut candidate = input(vec![detection("pothole", 0.9)]);
        candidate.address = Err(GeocodeError::Transport("connection refused".into()));

        let report = normalize(candidate, &Policy::default()).unwrap();
        assert_eq!(report.location.address, "");
        assert_eq!((report.location.lat, report.location.lng), (40.0, -73.0));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let mut candidate = input(vec![detection("pothole", 0.9)]);
        candidate.lat = 91.0;
        assert!(matches!(
            normalize(candidate, &Policy::default()),
            Err(IntakeError::InvalidLocation { .. })
        ));

        let mut candidate = input(vec![detection("pothole", 0.9)]);
        candidate.lng = f64::NAN;
        assert!(matches!(
            normalize(candidate, &Policy::default()),
            Err(IntakeError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn notes_are_cleaned_and_bounded() {
        assert_eq!(clean_text("note", Some("   ".into()), 10).unwrap(), None);
        assert_eq!(clean_text("note", None, 10).unwrap(), None);
        assert!(matches!(
            clean_text("note", Some("x".repeat(11)), 10),
            Err(IntakeError::Validation(_))
        ));
    }
}
