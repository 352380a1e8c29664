use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use townsense_common::{Detection, Location};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF_SECS: u64 = 30;

const SYSTEM_PROMPT: &str = "You are an urban infrastructure analysis expert. \
Interpret detection results from models that identify urban issues such as potholes, \
graffiti, overflowing bins and illegal parking, and look at the attached photo directly \
to find issues the models missed. Provide a short analysis covering: a summary of the \
detected issues, additional issues visible in the photo that were not detected, the \
likely impact on the community, recommended actions for city officials, and a priority \
level (low/medium/high). Format your response in Markdown.";

const PHOTO_PROMPT: &str = "Here is the photo to analyze directly. Identify any urban \
issues our models might not have detected:";

/// Writes a short markdown assessment of what was detected in a photo.
#[async_trait]
pub trait Assessor: Send + Sync {
    /// `image` is the prepared PNG.
    async fn assess(
        &self,
        detections: &[Detection],
        location: &Location,
        image: &[u8],
    ) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatAssessor {
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl ChatAssessor {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_retries: 2,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut retries = 0;

        loop {
            debug!(model = %request.model, attempt = retries + 1, "Assessment request");
            let sent = self
                .http
                .post(&url)
                .headers(self.headers()?)
                .json(request)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            let retryable = match sent {
                Ok(response) if response.status().is_success() => {
                    let body: ChatResponse = response.json().await?;
                    return body
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .ok_or_else(|| anyhow!("No content in assessment response"));
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    "rate limited".to_string()
                }
                Ok(response) => {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(anyhow!("Assessment API error ({status}): {error_text}"));
                }
                Err(e) if e.is_timeout() => "timed out".to_string(),
                Err(e) => return Err(e.into()),
            };

            retries += 1;
            if retries > self.max_retries {
                return Err(anyhow!("Assessment {retryable} after {retries} attempts"));
            }
            let wait = backoff_secs(retries);
            warn!(reason = %retryable, wait_secs = wait, "Retrying assessment");
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }
}

/// `min(2^n, 30)` seconds before retry `n`.
fn backoff_secs(retry: u32) -> u64 {
    2u64.saturating_pow(retry).min(MAX_BACKOFF_SECS)
}

fn detection_summary(detections: &[Detection], location: &Location) -> String {
    let mut lines = vec![format!("Location: {}", location.display_name())];
    if detections.is_empty() {
        lines.push("No objects were detected.".to_string());
    }
    for d in detections {
        lines.push(format!(
            "- {} ({:.1}% confidence{})",
            d.label,
            d.confidence * 100.0,
            d.model
                .as_deref()
                .map(|m| format!(", model {m}"))
                .unwrap_or_default()
        ));
    }
    lines.join("\n")
}

fn photo_data_uri(image: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(image);
    format!("data:image/png;base64,{encoded}")
}

fn build_request(
    model: &str,
    detections: &[Detection],
    location: &Location,
    image: &[u8],
) -> ChatRequest {
    let mut messages = vec![
        ChatMessage::text("system", SYSTEM_PROMPT),
        ChatMessage::text(
            "user",
            &format!(
                "Here are the detection results from our urban analysis models:\n\n{}",
                detection_summary(detections, location)
            ),
        ),
    ];
    if !image.is_empty() {
        messages.push(ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: PHOTO_PROMPT.into(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: photo_data_uri(image),
                    },
                },
            ]),
        });
    }

    ChatRequest {
        model: model.to_string(),
        temperature: 0.7,
        messages,
    }
}

#[async_trait]
impl Assessor for ChatAssessor {
    async fn assess(
        &self,
        detections: &[Detection],
        location: &Location,
        image: &[u8],
    ) -> Result<String> {
        let request = build_request(&self.model, detections, location, image);
        let content = self.chat(&request).await?;
        info!(chars = content.len(), "Assessment received");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

impl ChatMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
