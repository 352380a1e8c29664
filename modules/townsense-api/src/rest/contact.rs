use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::info;

use townsense_common::ContactMessage;

use crate::error::ApiError;
use crate::AppState;

pub async fn api_contact(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ContactMessage>,
) -> Result<Response, ApiError> {
    state.intake.contact(&body).await?;
    // Log without name, email or message (PII)
    info!("Contact message forwarded");
    Ok((StatusCode::ACCEPTED, Json(json!({"status": "forwarded"}))).into_response())
}
