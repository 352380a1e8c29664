//! In-memory report store for tests and single-node development.
//!
//! Every operation runs under one mutex, which makes the conditional insert
//! and the counter increment trivially atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use townsense_common::{haversine_m, Feedback, IssueType, Report, ReportStatus};

use crate::store::{InsertOutcome, ReportStore, StoreError};

#[derive(Default)]
struct State {
    reports: HashMap<Uuid, Report>,
    /// uniqueness key -> id, for open reports only.
    open_keys: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryReportStore {
    state: Mutex<State>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored report (for test assertions). Reads through
    /// a poisoned lock so a panicked writer cannot hide what it left behind.
    pub fn reports(&self) -> Vec<Report> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Report> = state.reports.values().cloned().collect();
        all.sort_by_key(|r| (r.created_at, r.id));
        all
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn find_open_near(
        &self,
        issue_type: IssueType,
        lat: f64,
        lng: f64,
        radius_m: f64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Report>, StoreError> {
        let state = self.state()?;
        let mut found: Vec<Report> = state
            .reports
            .values()
            .filter(|r| {
                r.status == ReportStatus::Open
                    && r.issue_type == issue_type
                    && r.created_at >= since
                    && haversine_m(lat, lng, r.location.lat, r.location.lng) <= radius_m
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        Ok(found)
    }

    async fn insert_if_absent(
        &self,
        report: &Report,
        key: &str,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state()?;

        if let Some(existing) = state
            .open_keys
            .get(key)
            .and_then(|id| state.reports.get(id))
            .filter(|r| r.status == ReportStatus::Open)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if let Some(existing) = state.reports.get(&report.id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        let mut stored = report.clone();
        stored.uniqueness_key = key.to_string();
        if stored.status == ReportStatus::Open {
            state.open_keys.insert(key.to_string(), stored.id);
        }
        state.reports.insert(stored.id, stored.clone());
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn increment_duplicate(&self, id: Uuid, at: DateTime<Utc>) -> Result<u32, StoreError> {
        let mut state = self.state()?;
        let report = state.reports.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if report.status != ReportStatus::Open {
            return Err(StoreError::NotOpen(id));
        }
        report.duplicate_count += 1;
        report.updated_at = report.updated_at.max(at);
        Ok(report.duplicate_count)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Report>, StoreError> {
        Ok(self.state()?.reports.get(&id).cloned())
    }

    async fn list_by_submitter(
        &self,
        submitter: &str,
        limit: usize,
    ) -> Result<Vec<Report>, StoreError> {
        let state = self.state()?;
        let mut found: Vec<Report> = state
            .reports
            .values()
            .filter(|r| r.submitter.as_deref() == Some(submitter))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn add_feedback(&self, feedback: &Feedback) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let report = state
            .reports
            .get_mut(&feedback.report_id)
            .ok_or(StoreError::NotFound(feedback.report_id))?;
        report.feedback.push(feedback.clone());
        report.feedback.sort_by_key(|f| f.submitted_at);
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: ReportStatus,
        to: ReportStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let report = state.reports.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if report.status != from {
            return Err(StoreError::StatusConflict {
                id,
                expected: from,
                current: report.status,
            });
        }
        report.status = to;
        report.updated_at = report.updated_at.max(at);
        let key = report.uniqueness_key.clone();

        if to != ReportStatus::Open && state.open_keys.get(&key) == Some(&id) {
            state.open_keys.remove(&key);
        }
        Ok(())
    }

    async fn delete_by_submitter(&self, submitter: &str) -> Result<u64, StoreError> {
        let mut state = self.state()?;
        let doomed: Vec<(Uuid, String)> = state
            .reports
            .values()
            .filter(|r| r.submitter.as_deref() == Some(submitter))
            .map(|r| (r.id, r.uniqueness_key.clone()))
            .collect();

        for (id, key) in &doomed {
            state.reports.remove(id);
            if state.open_keys.get(key) == Some(id) {
                state.open_keys.remove(key);
            }
        }
        Ok(doomed.len() as u64)
    }
}
