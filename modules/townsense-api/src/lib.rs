use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tokio::sync::Mutex;
use tower_http::set_header::SetResponseHeaderLayer;

use townsense_intake::Intake;

pub mod error;
pub mod rest;

/// Uploads above this are rejected before they reach the image decoder.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub struct AppState {
    pub intake: Arc<Intake>,
    pub submissions_per_hour: usize,
    pub rate_limiter: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl AppState {
    pub fn new(intake: Arc<Intake>, submissions_per_hour: usize) -> Self {
        Self {
            intake,
            submissions_per_hour,
            rate_limiter: Mutex::new(HashMap::new()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Reports
        .route(
            "/api/reports",
            get(rest::reports::api_history)
                .post(rest::reports::api_submit)
                .delete(rest::reports::api_clear_history),
        )
        .route("/api/reports/{id}", get(rest::reports::api_report_detail))
        .route(
            "/api/reports/{id}/feedback",
            post(rest::feedback::api_submit_feedback),
        )
        .route("/api/reports/{id}/resolve", post(rest::reports::api_resolve))
        .route("/api/images/{reference}", get(rest::images::api_image))
        // Contact form
        .route("/api/contact", post(rest::contact::api_contact))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        // CORS
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Privacy headers: no caching
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Logging layer: method + path only (no query params, no IP)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
