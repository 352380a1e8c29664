//! HTTP surface tests: the router over an in-memory intake, driven with `oneshot`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use townsense_api::{router, AppState};
use townsense_intake::testing::{detection, sample_png, Harness, MockDetector, MockGeocoder};

const BOUNDARY: &str = "townsense-test-boundary";

fn app(h: &Harness, per_hour: usize) -> Router {
    let state = Arc::new(AppState::new(h.intake.clone(), per_hour));
    router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
}

fn pothole_harness() -> Harness {
    Harness::new(
        MockDetector::returning(vec![detection("pothole", 0.9)]),
        MockGeocoder::with_address("Main Street"),
    )
}

fn multipart_body(image: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn submit_request(lat: &str, lng: &str) -> Request<Body> {
    let body = multipart_body(
        &sample_png(64, 48),
        &[("lat", lat), ("lng", lng), ("submitter", "robin")],
    );
    Request::post("/api/reports")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_check_answers_ok() {
    let h = pothole_harness();
    let response = app(&h, 10)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
}

#[tokio::test]
async fn first_submission_is_created_and_second_merges() {
    let h = pothole_harness();
    let app = app(&h, 10);

    let (status, first) = send(&app, submit_request("40.0", "-73.0")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["outcome"], "created");
    assert_eq!(first["report"]["issue_type"], "pothole");
    assert_eq!(first["report"]["duplicate_count"], 0);
    assert_eq!(first["notification"]["status"], "delivered");

    let (status, second) = send(&app, submit_request("40.0", "-73.0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "merged");
    assert_eq!(second["previous_count"], 0);
    assert_eq!(second["report"]["id"], first["report"]["id"]);
    assert_eq!(second["report"]["duplicate_count"], 1);

    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn photo_without_a_known_issue_is_unprocessable() {
    let h = Harness::new(
        MockDetector::returning(vec![detection("pothole", 0.1)]),
        MockGeocoder::with_address("Main Street"),
    );

    let (status, body) = send(&app(&h, 10), submit_request("40.0", "-73.0")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());
    assert!(h.store.reports().is_empty());
}

#[tokio::test]
async fn out_of_range_coordinates_are_rejected() {
    let h = pothole_harness();

    let (status, _) = send(&app(&h, 10), submit_request("95.0", "-73.0")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.detector.calls(), 0);
}

#[tokio::test]
async fn non_numeric_latitude_is_rejected() {
    let h = pothole_harness();

    let (status, body) = send(&app(&h, 10), submit_request("north", "-73.0")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation error: lat must be a number");
}

#[tokio::test]
async fn detector_outage_is_service_unavailable() {
    let h = Harness::new(MockDetector::failing(), MockGeocoder::with_address("Main Street"));

    let (status, _) = send(&app(&h, 10), submit_request("40.0", "-73.0")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn submissions_beyond_hourly_limit_are_throttled() {
    let h = pothole_harness();
    let app = app(&h, 3);

    for _ in 0..3 {
        let (status, _) = send(&app, submit_request("40.0", "-73.0")).await;
        assert!(status.is_success());
    }
    let (status, body) = send(&app, submit_request("40.0", "-73.0")).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].as_str().unwrap().contains("3 submissions"));
    assert_eq!(h.detector.calls(), 3);
}

#[tokio::test]
async fn unknown_report_is_not_found() {
    let h = pothole_harness();

    let (status, _) = send(
        &app(&h, 10),
        Request::get(format!("/api/reports/{}", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn report_detail_history_and_image_are_served() {
    let h = pothole_harness();
    let app = app(&h, 10);
    let (_, created) = send(&app, submit_request("40.0", "-73.0")).await;
    let id = created["report"]["id"].as_str().unwrap().to_string();
    let image_ref = created["report"]["image_ref"].as_str().unwrap().to_string();

    let (status, detail) = send(
        &app,
        Request::get(format!("/api/reports/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["location"]["address"], "Main Street");

    let (status, history) = send(
        &app,
        Request::get("/api/reports?submitter=robin&limit=5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/images/{image_ref}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
}

#[tokio::test]
async fn clearing_history_deletes_the_submitters_reports() {
    let h = pothole_harness();
    let app = app(&h, 10);
    let (_, created) = send(&app, submit_request("40.0", "-73.0")).await;
    let id = created["report"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Request::delete("/api/reports?submitter=robin")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (status, _) = send(
        &app,
        Request::get(format!("/api/reports/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Request::delete("/api/reports?submitter=%20")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn feedback_is_recorded_and_forwarded() {
    let h = pothole_harness();
    let app = app(&h, 10);
    let (_, created) = send(&app, submit_request("40.0", "-73.0")).await;
    let id = created["report"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/reports/{id}/feedback"),
            json!({"note": "it is actually a sinkhole", "correction": "other"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["feedback"]["note"], "it is actually a sinkhole");
    assert_eq!(body["feedback"]["correction"], "other");
    assert_eq!(h.feedback_hook.posted().len(), 1);
}

#[tokio::test]
async fn resolving_twice_conflicts() {
    let h = pothole_harness();
    let app = app(&h, 10);
    let (_, created) = send(&app, submit_request("40.0", "-73.0")).await;
    let id = created["report"]["id"].as_str().unwrap().to_string();
    let resolve = || {
        Request::post(format!("/api/reports/{id}/resolve"))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app, resolve()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "resolved");

    let (status, _) = send(&app, resolve()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn contact_message_is_accepted() {
    let h = pothole_harness();

    let (status, body) = send(
        &app(&h, 10),
        json_request(
            "POST",
            "/api/contact",
            json!({
                "first_name": "Robin",
                "last_name": "Park",
                "email": "robin@example.org",
                "message": "The streetlight on the corner of Main and 3rd has been out for a week now.",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "forwarded");
    assert_eq!(h.contact_hook.posted().len(), 1);
}

#[tokio::test]
async fn short_contact_message_is_rejected() {
    let h = pothole_harness();

    let (status, _) = send(
        &app(&h, 10),
        json_request(
            "POST",
            "/api/contact",
            json!({
                "first_name": "Robin",
                "last_name": "Park",
                "email": "robin@example.org",
                "message": "hi",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.contact_hook.posted().is_empty());
}
