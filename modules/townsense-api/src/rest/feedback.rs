use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use townsense_common::IssueType;

use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct FeedbackRequest {
    note: String,
    correction: Option<IssueType>,
}

pub async fn api_submit_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<FeedbackRequest>,
) -> Result<Response, ApiError> {
    let receipt = state
        .intake
        .submit_feedback(id, &body.note, body.correction)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)).into_response())
}
