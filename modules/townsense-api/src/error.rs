use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::warn;

use townsense_common::IntakeError;

/// `IntakeError` rendered as `{"error": "..."}` with a matching status.
pub struct ApiError(pub IntakeError);

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(e: &IntakeError) -> StatusCode {
    match e {
        IntakeError::NoIssueDetected => StatusCode::UNPROCESSABLE_ENTITY,
        IntakeError::InvalidLocation { .. }
        | IntakeError::InvalidImage(_)
        | IntakeError::Validation(_) => StatusCode::BAD_REQUEST,
        IntakeError::NotFound(_) => StatusCode::NOT_FOUND,
        IntakeError::InvalidTransition { .. } => StatusCode::CONFLICT,
        IntakeError::DetectorUnavailable(_) | IntakeError::StoreUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        IntakeError::NotificationFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(IntakeError::Validation(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn user_errors_are_4xx_and_outages_are_5xx() {
        assert_eq!(
            status_for(&IntakeError::NoIssueDetected),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&IntakeError::InvalidLocation { lat: 91.0, lng: 0.0 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&IntakeError::NotFound(Uuid::nil())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&IntakeError::StoreUnavailable("db down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&IntakeError::DetectorUnavailable("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
