use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Issue Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Pothole,
    Graffiti,
    OverflowingBin,
    IllegalParking,
    Other,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueType::Pothole => write!(f, "pothole"),
            IssueType::Graffiti => write!(f, "graffiti"),
            IssueType::OverflowingBin => write!(f, "overflowing-bin"),
            IssueType::IllegalParking => write!(f, "illegal-parking"),
            IssueType::Other => write!(f, "other"),
        }
    }
}

impl FromStr for IssueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "pothole" => Ok(IssueType::Pothole),
            "graffiti" => Ok(IssueType::Graffiti),
            "overflowing-bin" => Ok(IssueType::OverflowingBin),
            "illegal-parking" => Ok(IssueType::IllegalParking),
            "other" => Ok(IssueType::Other),
            other => Err(format!("unknown issue type: {other}")),
        }
    }
}

impl IssueType {
    /// Map a raw detector class name onto an issue type by keyword.
    /// Detector vocabularies differ per model ("potholes", "Garbage", "trash_bag"),
    /// so anything unrecognised lands in `Other` rather than failing.
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["pothole"]) {
            IssueType::Pothole
        } else if has(&["graffiti", "vandalism", "tag"]) {
            IssueType::Graffiti
        } else if has(&["garbage", "waste", "trash", "bin", "litter", "overflow"]) {
            IssueType::OverflowingBin
        } else if has(&["parking", "parked", "car", "vehicle"]) {
            IssueType::IllegalParking
        } else {
            IssueType::Other
        }
    }
}

// --- Report Status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Open,
    Merged,
    Resolved,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Open => write!(f, "open"),
            ReportStatus::Merged => write!(f, "merged"),
            ReportStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ReportStatus::Open),
            "merged" => Ok(ReportStatus::Merged),
            "resolved" => Ok(ReportStatus::Resolved),
            other => Err(format!("unknown report status: {other}")),
        }
    }
}

impl ReportStatus {
    /// Status only ever moves forward out of `Open`.
    pub fn can_transition_to(self, next: ReportStatus) -> bool {
        matches!(
            (self, next),
            (ReportStatus::Open, ReportStatus::Merged) | (ReportStatus::Open, ReportStatus::Resolved)
        )
    }
}

// --- Geometry ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    /// Resolved street address. Empty when reverse geocoding failed.
    #[serde(default)]
    pub address: String,
}

impl Location {
    /// Address when known, raw coordinates otherwise.
    pub fn display_name(&self) -> String {
        if self.address.is_empty() {
            format!("{:.6}, {:.6}", self.lat, self.lng)
        } else {
            self.address.clone()
        }
    }
}

/// Pixel-space bounding box, `(x1, y1)` top-left to `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Accepts the `[x1, y1, x2, y2]` array form detectors emit.
    pub fn from_slice(coords: &[f64]) -> Option<Self> {
        match coords {
            [x1, y1, x2, y2] => Some(Self {
                x1: *x1,
                y1: *y1,
                x2: *x2,
                y2: *y2,
            }),
            _ => None,
        }
    }
}

/// One candidate object from the detector, already normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Which detection model produced it, when the detector runs several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// --- Reports ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub issue_type: IssueType,
    /// Detector class name the issue type was derived from.
    pub label: String,
    pub location: Location,
    pub image_ref: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub note: Option<String>,
    pub submitter: Option<String>,
    pub assessment: Option<String>,
    pub status: ReportStatus,
    pub duplicate_count: u32,
    pub uniqueness_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub feedback: Vec<Feedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    /// Parent report. Lookup only; feedback never keeps a report alive.
    pub report_id: Uuid,
    pub note: String,
    pub correction: Option<IssueType>,
    pub submitted_at: DateTime<Utc>,
}

/// Message from the public contact form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactMessage {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub message: String,
}
