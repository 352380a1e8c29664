//! Create-vs-merge decision for candidate reports.

use std::sync::Arc;

use tracing::{debug, info};

use townsense_common::{haversine_m, DuplicateWindow, IntakeError, Report};
use townsense_store::{InsertOutcome, ReportStore, StoreError};

/// A merge target may close between the lookup and the increment; the
/// decision is re-evaluated up to this many times.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    /// No open match: the candidate was stored as a new open report.
    Created { report: Report },
    /// The candidate was folded into an existing open report.
    Merged { report: Report, previous_count: u32 },
}

impl DedupOutcome {
    pub fn report(&self) -> &Report {
        match self {
            DedupOutcome::Created { report } | DedupOutcome::Merged { report, .. } => report,
        }
    }
}

pub struct DedupEngine {
    store: Arc<dyn ReportStore>,
    window: DuplicateWindow,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn ReportStore>, window: DuplicateWindow) -> Self {
        Self { store, window }
    }

    /// Decide whether `candidate` is new or a duplicate and apply that
    /// decision to the store. The candidate is written at most once, and a
    /// merge only ever touches the target's counter and last-updated time.
    pub async fn evaluate(&self, candidate: Report) -> Result<DedupOutcome, IntakeError> {
        let (lat, lng) = (candidate.location.lat, candidate.location.lng);
        let key = self
            .window
            .uniqueness_key(candidate.issue_type, lat, lng, candidate.created_at)?;
        let since = self.window.since(candidate.created_at);

        for attempt in 1..=MAX_ATTEMPTS {
            let matches = self
                .store
                .find_open_near(candidate.issue_type, lat, lng, self.window.radius_m, since)
                .await
                .map_err(unavailable)?;

            let target = match closest(lat, lng, matches) {
                Some(target) => target,
                None => match self
                    .store
                    .insert_if_absent(&candidate, &key)
                    .await
                    .map_err(unavailable)?
                {
                    InsertOutcome::Inserted(report) => {
                        info!(
                            report_id = %report.id,
                            issue_type = %report.issue_type,
                            key = %key,
                            "Report created"
                        );
                        return Ok(DedupOutcome::Created { report });
                    }
                    InsertOutcome::Existing(existing) => {
                        debug!(report_id = %existing.id, "Lost create race, merging instead");
                        existing
                    }
                },
            };

            match self
                .store
                .increment_duplicate(target.id, candidate.created_at)
                .await
            {
                Ok(count) => {
                    let mut report = target;
                    report.duplicate_count = count;
                    report.updated_at = report.updated_at.max(candidate.created_at);
                    info!(
                        report_id = %report.id,
                        duplicate_count = count,
                        "Report merged"
                    );
                    return Ok(DedupOutcome::Merged {
                        report,
                        previous_count: count.saturating_sub(1),
                    });
                }
                Err(StoreError::NotOpen(id)) | Err(StoreError::NotFound(id)) => {
                    debug!(report_id = %id, attempt, "Merge target closed, re-evaluating");
                }
                Err(e) => return Err(unavailable(e)),
            }
        }

        Err(IntakeError::StoreUnavailable(format!(
            "no stable merge target after {MAX_ATTEMPTS} attempts"
        )))
    }
}

fn unavailable(e: StoreError) -> IntakeError {
    IntakeError::StoreUnavailable(e.to_string())
}

/// Nearest report; ties go to the earliest created, then the smallest id.
fn closest(lat: f64, lng: f64, reports: Vec<Report>) -> Option<Report> {
    reports
        .into_iter()
        .map(|r| (haversine_m(lat, lng, r.location.lat, r.location.lng), r))
        .min_by(|(da, a), (db, b)| {
            da.total_cmp(db)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(_, r)| r)
}
