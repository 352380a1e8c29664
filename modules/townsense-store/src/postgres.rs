//! ReportStore backed by Postgres.
//!
//! Conditional create relies on the partial unique index
//! `reports_open_key (uniqueness_key) WHERE status = 'open'`; merges are a
//! single `UPDATE ... SET duplicate_count = duplicate_count + 1`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use townsense_common::{
    bounding_box, haversine_m, BoundingBox, Feedback, IssueType, Location, Report, ReportStatus,
};

use crate::store::{InsertOutcome, ReportStore, StoreError};

const REPORT_COLUMNS: &str = "id, issue_type, label, lat, lng, address, image_ref, confidence, \
     bbox_x1, bbox_y1, bbox_x2, bbox_y2, note, submitter, assessment, status, duplicate_count, \
     uniqueness_key, created_at, updated_at";

/// Conflicting open report can resolve between our insert and our read; retry that many times.
const INSERT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations (idempotent).
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn open_by_key(&self, key: &str) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE uniqueness_key = $1 AND status = 'open'"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut reports = vec![report_from_row(&row)?];
                self.attach_feedback(&mut reports).await?;
                Ok(reports.pop())
            }
            None => Ok(None),
        }
    }

    async fn status_of(&self, id: Uuid) -> Result<Option<ReportStatus>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT status FROM reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(s,)| s.parse::<ReportStatus>().map_err(StoreError::Corrupt))
            .transpose()
    }

    async fn attach_feedback(&self, reports: &mut [Report]) -> Result<(), StoreError> {
        if reports.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = reports.iter().map(|r| r.id).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, report_id, note, correction, submitted_at
            FROM feedback
            WHERE report_id = ANY($1)
            ORDER BY submitted_at ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_report: HashMap<Uuid, Vec<Feedback>> = HashMap::new();
        for row in rows {
            let feedback = feedback_from_row(&row)?;
            by_report.entry(feedback.report_id).or_default().push(feedback);
        }
        for report in reports.iter_mut() {
            report.feedback = by_report.remove(&report.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn find_open_near(
        &self,
        issue_type: IssueType,
        lat: f64,
        lng: f64,
        radius_m: f64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Report>, StoreError> {
        let (min_lat, max_lat, min_lng, max_lng) = bounding_box(lat, lng, radius_m);
        // Boxes crossing the antimeridian skip the longitude prefilter.
        let wraps = min_lng < -180.0 || max_lng > 180.0;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM reports
            WHERE status = 'open'
              AND issue_type = $1
              AND created_at >= $2
              AND lat BETWEEN $3 AND $4
              AND ($7 OR lng BETWEEN $5 AND $6)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(issue_type.to_string())
        .bind(since)
        .bind(min_lat)
        .bind(max_lat)
        .bind(min_lng)
        .bind(max_lng)
        .bind(wraps)
        .fetch_all(&self.pool)
        .await?;

        let mut reports = rows
            .iter()
            .map(report_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        reports.retain(|r| haversine_m(lat, lng, r.location.lat, r.location.lng) <= radius_m);
        self.attach_feedback(&mut reports).await?;

        debug!(%issue_type, lat, lng, found = reports.len(), "find_open_near");
        Ok(reports)
    }

    async fn insert_if_absent(
        &self,
        report: &Report,
        key: &str,
    ) -> Result<InsertOutcome, StoreError> {
        let duplicate_count = i32::try_from(report.duplicate_count)
            .map_err(|_| StoreError::Corrupt("duplicate_count overflows INTEGER".into()))?;

        for _ in 0..INSERT_ATTEMPTS {
            let inserted = sqlx::query_as::<_, (Uuid,)>(
                r#"
                INSERT INTO reports (
                    id, issue_type, label, lat, lng, address, image_ref, confidence,
                    bbox_x1, bbox_y1, bbox_x2, bbox_y2, note, submitter, assessment,
                    status, duplicate_count, uniqueness_key, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19, $20)
                ON CONFLICT (uniqueness_key) WHERE status = 'open' DO NOTHING
                RETURNING id
                "#,
            )
            .bind(report.id)
            .bind(report.issue_type.to_string())
            .bind(&report.label)
            .bind(report.location.lat)
            .bind(report.location.lng)
            .bind(&report.location.address)
            .bind(&report.image_ref)
            .bind(report.confidence)
            .bind(report.bbox.x1)
            .bind(report.bbox.y1)
            .bind(report.bbox.x2)
            .bind(report.bbox.y2)
            .bind(&report.note)
            .bind(&report.submitter)
            .bind(&report.assessment)
            .bind(report.status.to_string())
            .bind(duplicate_count)
            .bind(key)
            .bind(report.created_at)
            .bind(report.updated_at)
            .fetch_optional(&self.pool)
            .await?;

            if inserted.is_some() {
                let mut stored = report.clone();
                stored.uniqueness_key = key.to_string();
                return Ok(InsertOutcome::Inserted(stored));
            }

            if let Some(existing) = self.open_by_key(key).await? {
                return Ok(InsertOutcome::Existing(existing));
            }
            debug!(key, "conflicting open report left the key, retrying insert");
        }

        Err(StoreError::Unavailable(format!(
            "uniqueness key {key} kept changing hands"
        )))
    }

    async fn increment_duplicate(&self, id: Uuid, at: DateTime<Utc>) -> Result<u32, StoreError> {
        let row = sqlx::query_as::<_, (i32,)>(
            r#"
            UPDATE reports
            SET duplicate_count = duplicate_count + 1,
                updated_at = GREATEST(updated_at, $2)
            WHERE id = $1 AND status = 'open'
            RETURNING duplicate_count
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((count,)) => u32::try_from(count)
                .map_err(|_| StoreError::Corrupt(format!("negative duplicate_count on {id}"))),
            None => match self.status_of(id).await? {
                Some(_) => Err(StoreError::NotOpen(id)),
                None => Err(StoreError::NotFound(id)),
            },
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut reports = vec![report_from_row(&row)?];
                self.attach_feedback(&mut reports).await?;
                Ok(reports.pop())
            }
            None => Ok(None),
        }
    }

    async fn list_by_submitter(
        &self,
        submitter: &str,
        limit: usize,
    ) -> Result<Vec<Report>, StoreError> {
        let limit = limit.min(500) as i64;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM reports
            WHERE submitter = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(submitter)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut reports = rows
            .iter()
            .map(report_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_feedback(&mut reports).await?;
        Ok(reports)
    }

    async fn add_feedback(&self, feedback: &Feedback) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO feedback (id, report_id, note, correction, submitted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(feedback.id)
        .bind(feedback.report_id)
        .bind(&feedback.note)
        .bind(feedback.correction.map(|c| c.to_string()))
        .bind(feedback.submitted_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::NotFound(feedback.report_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: ReportStatus,
        to: ReportStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE reports
            SET status = $3, updated_at = GREATEST(updated_at, $4)
            WHERE id = $1 AND status = $2
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            return Ok(());
        }
        match self.status_of(id).await? {
            Some(current) => Err(StoreError::StatusConflict {
                id,
                expected: from,
                current,
            }),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn delete_by_submitter(&self, submitter: &str) -> Result<u64, StoreError> {
        // Feedback rows go with their report (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM reports WHERE submitter = $1")
            .bind(submitter)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn report_from_row(row: &PgRow) -> Result<Report, StoreError> {
    let issue_type: String = row.try_get("issue_type")?;
    let status: String = row.try_get("status")?;
    let duplicate_count: i32 = row.try_get("duplicate_count")?;

    Ok(Report {
        id: row.try_get("id")?,
        issue_type: issue_type.parse().map_err(StoreError::Corrupt)?,
        label: row.try_get("label")?,
        location: Location {
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
            address: row.try_get("address")?,
        },
        image_ref: row.try_get("image_ref")?,
        confidence: row.try_get("confidence")?,
        bbox: BoundingBox {
            x1: row.try_get("bbox_x1")?,
            y1: row.try_get("bbox_y1")?,
            x2: row.try_get("bbox_x2")?,
            y2: row.try_get("bbox_y2")?,
        },
        note: row.try_get("note")?,
        submitter: row.try_get("submitter")?,
        assessment: row.try_get("assessment")?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        duplicate_count: u32::try_from(duplicate_count)
            .map_err(|_| StoreError::Corrupt("negative duplicate_count".into()))?,
        uniqueness_key: row.try_get("uniqueness_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        feedback: Vec::new(),
    })
}

fn feedback_from_row(row: &PgRow) -> Result<Feedback, StoreError> {
    let correction: Option<String> = row.try_get("correction")?;
    Ok(Feedback {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        note: row.try_get("note")?,
        correction: correction
            .map(|c| c.parse::<IssueType>())
            .transpose()
            .map_err(StoreError::Corrupt)?,
        submitted_at: row.try_get("submitted_at")?,
    })
}
