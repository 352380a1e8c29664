use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use townsense_intake::{DedupOutcome, Submission};

use super::{check_rate_limit, prune_empty_entries};
use crate::error::{bad_request, ApiError};
use crate::AppState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    submitter: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct ClearQuery {
    submitter: String,
}

/// Multipart fields of a photo submission.
#[derive(Default)]
struct SubmissionForm {
    image: Option<Vec<u8>>,
    lat: Option<f64>,
    lng: Option<f64>,
    note: Option<String>,
    submitter: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<SubmissionForm, ApiError> {
    let mut form = SubmissionForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("unreadable image: {e}")))?;
                form.image = Some(bytes.to_vec());
            }
            "lat" | "lng" | "note" | "submitter" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("unreadable {name}: {e}")))?;
                match name.as_str() {
                    "lat" => form.lat = Some(parse_coordinate("lat", &text)?),
                    "lng" => form.lng = Some(parse_coordinate("lng", &text)?),
                    "note" => form.note = Some(text),
                    _ => form.submitter = Some(text),
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

fn parse_coordinate(field: &str, raw: &str) -> Result<f64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| bad_request(format!("{field} must be a number")))
}

pub async fn api_submit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    // Rate limit: N submissions per hour per IP
    {
        let now = Instant::now();
        let mut limiter = state.rate_limiter.lock().await;
        if limiter.len() > 1000 {
            prune_empty_entries(&mut limiter, now);
        }
        let entries = limiter.entry(addr.ip()).or_default();
        if !check_rate_limit(entries, now, state.submissions_per_hour) {
            return Ok((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": format!(
                        "Rate limit exceeded, max {} submissions per hour",
                        state.submissions_per_hour
                    )
                })),
            )
                .into_response());
        }
    }

    let form = read_form(multipart).await?;
    let image = form.image.ok_or_else(|| bad_request("image is required"))?;
    let (Some(lat), Some(lng)) = (form.lat, form.lng) else {
        return Err(bad_request("lat and lng are required"));
    };

    let receipt = state
        .intake
        .submit(Submission {
            image,
            lat,
            lng,
            note: form.note,
            submitter: form.submitter,
            captured_at: Utc::now(),
        })
        .await?;

    // Log without note or submitter (may contain PII)
    info!(
        report_id = %receipt.outcome.report().id,
        created = matches!(receipt.outcome, DedupOutcome::Created { .. }),
        "Submission processed"
    );

    let response = match receipt.outcome {
        DedupOutcome::Created { report } => (
            StatusCode::CREATED,
            Json(json!({
                "outcome": "created",
                "report": report,
                "notification": receipt.notification,
            })),
        ),
        DedupOutcome::Merged {
            report,
            previous_count,
        } => (
            StatusCode::OK,
            Json(json!({
                "outcome": "merged",
                "previous_count": previous_count,
                "report": report,
            })),
        ),
    };
    Ok(response.into_response())
}

pub async fn api_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let reports = state.intake.history(&q.submitter, q.limit).await?;
    Ok(Json(reports).into_response())
}

pub async fn api_clear_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ClearQuery>,
) -> Result<Response, ApiError> {
    let deleted = state.intake.clear_history(&q.submitter).await?;
    Ok(Json(json!({ "deleted": deleted })).into_response())
}

pub async fn api_report_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let report = state.intake.get(id).await?;
    Ok(Json(report).into_response())
}

pub async fn api_resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let report = state.intake.resolve(id).await?;
    Ok(Json(report).into_response())
}
