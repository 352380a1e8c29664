use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use townsense_common::{Feedback, IssueType, Report, ReportStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Report {0} not found")]
    NotFound(Uuid),

    #[error("Report {0} is no longer open")]
    NotOpen(Uuid),

    #[error("Report {id} is {current}, expected {expected}")]
    StatusConflict {
        id: Uuid,
        expected: ReportStatus,
        current: ReportStatus,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Result of a conditional create.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The report was written.
    Inserted(Report),
    /// An open report already holds the uniqueness key; nothing was written.
    Existing(Report),
}

/// Keyed collection of reports and their feedback.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Open reports of `issue_type` within `radius_m` of the point, created at
    /// or after `since`. Feedback is hydrated.
    async fn find_open_near(
        &self,
        issue_type: IssueType,
        lat: f64,
        lng: f64,
        radius_m: f64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Report>, StoreError>;

    /// Write `report` unless an open report already holds `key`.
    /// Atomic: concurrent calls with the same key insert exactly once.
    async fn insert_if_absent(&self, report: &Report, key: &str)
        -> Result<InsertOutcome, StoreError>;

    /// Atomically bump the duplicate counter of an open report and extend its
    /// last-updated timestamp. Returns the new count.
    async fn increment_duplicate(&self, id: Uuid, at: DateTime<Utc>) -> Result<u32, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Report>, StoreError>;

    /// Reports filed by one submitter, newest first.
    async fn list_by_submitter(
        &self,
        submitter: &str,
        limit: usize,
    ) -> Result<Vec<Report>, StoreError>;

    /// Persist a feedback entry. Fails with `NotFound` when the parent is gone.
    async fn add_feedback(&self, feedback: &Feedback) -> Result<(), StoreError>;

    /// Compare-and-set on status: applies only while the report is in `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: ReportStatus,
        to: ReportStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove every report filed by `submitter` together with its feedback.
    /// Returns how many reports were removed.
    async fn delete_by_submitter(&self, submitter: &str) -> Result<u64, StoreError>;
}
