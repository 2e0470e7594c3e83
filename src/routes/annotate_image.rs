use super::{is_supported_image, render_boxes, RenderError};
use crate::{
    annotate::AnnotateError,
    detection::{normalize, NormalizeError},
    detector::DetectorError,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/annotate";

#[derive(Error, Debug)]
pub enum AnnotateImageError {
    #[error("Body is not a PNG or JPEG image")]
    UnsupportedImage,
    #[error("Unable to process image.")]
    Detection(#[source] DetectorError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("Detection service returned labels without box geometry")]
    NoGeometry,
    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for AnnotateImageError {
    fn into_response(self) -> Response {
        let status = match &self {
            AnnotateImageError::UnsupportedImage => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AnnotateImageError::Detection(_)
            | AnnotateImageError::Normalize(NormalizeError::UnrecognizedResponse) => {
                StatusCode::BAD_GATEWAY
            }
            AnnotateImageError::Normalize(NormalizeError::NoDetection)
            | AnnotateImageError::NoGeometry => StatusCode::UNPROCESSABLE_ENTITY,
            AnnotateImageError::Render(RenderError::Annotate(AnnotateError::DecodeError(_))) => {
                StatusCode::BAD_REQUEST
            }
            AnnotateImageError::Render(RenderError::Annotate(
                AnnotateError::InvalidGeometry { .. },
            )) => StatusCode::BAD_GATEWAY,
            AnnotateImageError::Render(_) | AnnotateImageError::HttpBuilder(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Takes raw image bytes and answers with the same image, boxes drawn, as PNG.
#[instrument(skip(state, image_data))]
pub async fn annotate_image(
    State(state): State<SharedState>,
    image_data: Bytes,
) -> Result<Response, AnnotateImageError> {
    state.metrics.record_request(ROUTE);
    if !is_supported_image(&image_data) {
        return Err(AnnotateImageError::UnsupportedImage);
    }

    let started = Instant::now();
    let raw = state
        .detector
        .detect(image_data.clone())
        .await
        .map_err(|e| {
            tracing::error!("Detection failed: {}", e);
            AnnotateImageError::Detection(e)
        })?;
    state
        .metrics
        .record_detection_duration(started.elapsed().as_millis() as u64, ROUTE);

    let result = normalize(&raw)?;
    let detections = result
        .boxes()
        .ok_or(AnnotateImageError::NoGeometry)?
        .to_vec();
    tracing::debug!("Drawing {} detection(s)", detections.len());

    let annotated_image_data = render_boxes(image_data, detections).await?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .body(axum::body::Body::from(annotated_image_data))
        .map_err(|e| AnnotateImageError::HttpBuilder(e.to_string()))?;

    Ok(response)
}
