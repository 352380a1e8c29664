use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use townsense_common::{BoundingBox, Detection};

const DETECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector request failed: {0}")]
    Transport(String),

    #[error("Detector returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unreadable detector response: {0}")]
    Decode(String),
}

/// Object detection over a single image.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Candidate issues found in the image, in the order the detector reported them.
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError>;
}

/// Detector service reached over HTTP.
///
/// The image goes out as multipart field `image`; the service answers with
/// `{"detected_objects": {"<model>": [{"name", "confidence", "bbox"}]}}`.
pub struct HttpDetector {
    url: String,
    http: reqwest::Client,
}

impl HttpDetector {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        let part = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name("upload.png")
            .mime_str("image/png")
            .map_err(|e| DetectorError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let resp = self
            .http
            .post(&self.url)
            .multipart(form)
            .timeout(DETECT_TIMEOUT)
            .send()
            .await
            .map_err(|e| DetectorError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, body = %body, "Detector returned non-success");
            return Err(DetectorError::Status { status, body });
        }

        let body: DetectorResponse = resp
            .json()
            .await
            .map_err(|e| DetectorError::Decode(e.to_string()))?;
        let detections = body.into_detections();
        debug!(count = detections.len(), "Detector responded");
        Ok(detections)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DetectorResponse {
    #[serde(default)]
    detected_objects: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawDetection {
    name: String,
    confidence: f64,
    #[serde(default)]
    bbox: Vec<f64>,
}

impl DetectorResponse {
    /// Flatten the per-model lists. Entries that do not parse, or carry a
    /// non-finite confidence, are dropped rather than failing the whole image.
    fn into_detections(self) -> Vec<Detection> {
        let mut out = Vec::new();
        for (model, value) in self.detected_objects {
            let Ok(raw) = serde_json::from_value::<Vec<RawDetection>>(value) else {
                warn!(model = %model, "Skipping malformed detection list");
                continue;
            };
            out.extend(raw.into_iter().filter(|d| d.confidence.is_finite()).map(|d| {
                Detection {
                    label: d.name,
                    confidence: d.confidence.clamp(0.0, 1.0),
                    bbox: BoundingBox::from_slice(&d.bbox).unwrap_or_default(),
                    model: Some(model.clone()),
                }
            }));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Vec<Detection> {
        serde_json::from_value::<DetectorResponse>(value)
            .unwrap()
            .into_detections()
    }

    #[test]
    fn flattens_models_into_detections() {
        let detections = parse(json!({
            "detected_objects": {
                "pothole_model": [
                    {"name": "pothole", "confidence": 0.85, "bbox": [10.0, 20.0, 110.0, 220.0]}
                ],
                "garbage_model": [
                    {"name": "Garbage", "confidence": 0.5, "bbox": [0.0, 0.0, 5.0, 5.0]},
                    {"name": "trash bag", "confidence": 0.3, "bbox": [1.0, 1.0, 2.0, 2.0]}
                ]
            }
        }));

        assert_eq!(detections.len(), 3);
        let pothole = detections.iter().find(|d| d.label == "pothole").unwrap();
        assert_eq!(pothole.confidence, 0.85);
        assert_eq!(pothole.bbox.x2, 110.0);
        assert_eq!(pothole.model.as_deref(), Some("pothole_model"));
    }

    #[test]
    fn models_keep_their_wire_order() {
        let body = r#"{"detected_objects": {
            "zeta_model": [{"name": "graffiti", "confidence": 0.6}],
            "alpha_model": [{"name": "Garbage", "confidence": 0.6}]
        }}"#;
        let detections = serde_json::from_str::<DetectorResponse>(body)
            .unwrap()
            .into_detections();

        assert_eq!(detections[0].model.as_deref(), Some("zeta_model"));
        assert_eq!(detections[1].model.as_deref(), Some("alpha_model"));
        let chosen = crate::normalizer::select_detection(&detections, 0.4).unwrap();
        assert_eq!(chosen.label, "graffiti");
    }

    #[test]
    fn empty_or_missing_objects_yield_nothing() {
        assert!(parse(json!({})).is_empty());
        assert!(parse(json!({"detected_objects": {"m": []}})).is_empty());
    }

    #[test]
    fn malformed_model_lists_are_skipped() {
        let detections = parse(json!({
            "detected_objects": {
                "broken": "not a list",
                "ok": [{"name": "graffiti", "confidence": 0.7}]
            }
        }));
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::default());
    }
}
