use super::{is_supported_image, render_boxes};
use crate::{
    detection::{normalize, DetectionResult, NormalizeError},
    detector::DetectorError,
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/identify";
const FILE_FIELD: &str = "file";
const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/jpg"];
const DESCRIPTION_FAILED: &str = "Unable to generate a description for this gemstone.";
const LOGGED_BODY_CHARS: usize = 512;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("No `file` field in the upload")]
    MissingFile,
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Unsupported image type: {0}. Upload a PNG or JPEG image.")]
    UnsupportedMediaType(String),
    #[error("Unable to process image.")]
    Detection(#[source] DetectorError),
}

impl IntoResponse for IdentifyError {
    fn into_response(self) -> Response {
        let status = match &self {
            IdentifyError::MissingFile => StatusCode::BAD_REQUEST,
            // 413 once the upload exceeds the body limit
            IdentifyError::Multipart(e) => e.status(),
            IdentifyError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            IdentifyError::Detection(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Warning,
    Error,
}

#[derive(Serialize, Debug)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

impl Message {
    fn warning(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            text: text.into(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct IdentifyResponse {
    pub result: DetectionResult,
    pub summary: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<Message>,
}

async fn read_upload(multipart: &mut Multipart) -> Result<Bytes, IdentifyError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().map(str::to_lowercase);
        if let Some(content_type) = &content_type {
            if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
                return Err(IdentifyError::UnsupportedMediaType(content_type.clone()));
            }
        }

        let data = field.bytes().await?;
        if !is_supported_image(&data) {
            return Err(IdentifyError::UnsupportedMediaType(
                content_type.unwrap_or_else(|| "unknown".into()),
            ));
        }
        return Ok(data);
    }
    Err(IdentifyError::MissingFile)
}

/// Detects gemstones in the uploaded image, draws their boxes when the
/// backend returns geometry, and asks for a write-up of what was found.
/// Anything that fails after the detector answered is reported inline.
#[instrument(skip(state, multipart))]
pub async fn identify(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<IdentifyResponse>, IdentifyError> {
    state.metrics.record_request(ROUTE);
    let image_data = read_upload(&mut multipart).await?;

    let started = Instant::now();
    let raw = state
        .detector
        .detect(image_data.clone())
        .await
        .map_err(|e| {
            tracing::error!("Detection failed: {}", e);
            IdentifyError::Detection(e)
        })?;
    state
        .metrics
        .record_detection_duration(started.elapsed().as_millis() as u64, ROUTE);

    let mut messages = Vec::new();
    let result = match normalize(&raw) {
        Ok(result) => result,
        Err(e @ NormalizeError::NoDetection) => {
            messages.push(Message::warning(e.to_string()));
            DetectionResult::Empty
        }
        Err(e @ NormalizeError::UnrecognizedResponse) => {
            tracing::warn!(
                "Unrecognized detection response: {}",
                truncated(&raw.to_string(), LOGGED_BODY_CHARS)
            );
            messages.push(Message::error(e.to_string()));
            DetectionResult::Empty
        }
    };
    state.metrics.record_outcome(outcome(&result));

    let annotated_image = match result.boxes() {
        Some(detections) => match render_boxes(image_data, detections.to_vec()).await {
            Ok(png) => Some(STANDARD.encode(png)),
            Err(e) => {
                tracing::error!("Failed to draw detection boxes: {}", e);
                messages.push(Message::error(e.to_string()));
                None
            }
        },
        None => None,
    };

    let labels = result.labels();
    let description = match &state.generator {
        Some(generator) if !labels.is_empty() => {
            let started = Instant::now();
            let description = generator.describe(&labels).await;
            state
                .metrics
                .record_generation_duration(started.elapsed().as_millis() as u64);
            match description {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::error!("Text generation failed: {}", e);
                    messages.push(Message::error(DESCRIPTION_FAILED));
                    None
                }
            }
        }
        _ => None,
    };

    tracing::debug!(
        "Identified {} label(s) with {} message(s)",
        labels.len(),
        messages.len()
    );

    Ok(Json(IdentifyResponse {
        summary: result.summary_lines(),
        result,
        annotated_image,
        description,
        messages,
    }))
}

/// Cuts `text` to at most `max_chars` characters, marking the cut.
fn truncated(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}... ({} bytes total)", &text[..end], text.len()),
        None => text.to_string(),
    }
}

fn outcome(result: &DetectionResult) -> &'static str {
    match result {
        DetectionResult::BoxedDetections(_) => "boxed_detections",
        DetectionResult::SingleLabel(_) => "single_label",
        DetectionResult::LabelCounts(_) => "label_counts",
        DetectionResult::Empty => "empty",
    }
}
