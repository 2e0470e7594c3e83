mod annotate_image;
mod health;
mod identify;
mod metrics;

use crate::{
    annotate::{draw_boxes, AnnotateError},
    detection::Detection,
    server::SharedState,
};
use annotate_image::annotate_image;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use health::healthcheck;
use identify::identify;
use image::ImageFormat;
use metrics::metrics_handler;
use thiserror::Error;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn api_routes() -> Router<SharedState> {
    routes_with_upload_limit(MAX_UPLOAD_BYTES)
}

fn routes_with_upload_limit(max_upload_bytes: usize) -> Router<SharedState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/identify", post(identify))
        .route("/annotate", post(annotate_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Annotate(#[from] AnnotateError),
    #[error("Rendering task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs the box renderer off the async workers.
async fn render_boxes(
    image_data: Bytes,
    detections: Vec<Detection>,
) -> Result<Vec<u8>, RenderError> {
    let png = tokio::task::spawn_blocking(move || draw_boxes(&image_data, &detections)).await??;
    Ok(png)
}

/// Only PNG and JPEG uploads are accepted.
fn is_supported_image(image_data: &[u8]) -> bool {
    matches!(
        image::guess_format(image_data),
        Ok(ImageFormat::Png | ImageFormat::Jpeg)
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    #[test]
    fn test_supported_images() {
        assert!(is_supported_image(&png_bytes(2, 2)));
        assert!(!is_supported_image(b"GIF89a......"));
        assert!(!is_supported_image(b"hello"));
    }

    async fn health(state: crate::server::SharedState) -> serde_json::Value {
        let response = api_routes()
            .with_state(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck_reports_descriptions() {
        let value = health(state(Ok(json!("ruby")), None)).await;
        assert_eq!(value, json!({"status": "Available", "descriptions": false}));

        let generator = std::sync::Arc::new(MockGenerator::default());
        let value = health(state(Ok(json!("ruby")), Some(generator))).await;
        assert_eq!(value["descriptions"], true);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let app = routes_with_upload_limit(1024).with_state(state(Ok(json!("ruby")), None));
        let oversized = vec![7u8; 8 * 1024];

        let response = app
            .clone()
            .oneshot(multipart_request("/identify", "image/png", &oversized))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = app
            .oneshot(
                Request::post("/annotate")
                    .body(Body::from(oversized))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_requests() {
        let state = state(Ok(json!("ruby")), None);
        let app = api_routes().with_state(state);

        let response = app
            .clone()
            .oneshot(multipart_request("/identify", "image/png", &png_bytes(4, 4)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("requests_total"));
    }
}
