use crate::config::DetectionConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detection service answered with status {status}")]
    Transport { status: StatusCode },
    #[error("Detection request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Sends one image to a detection backend and hands back its raw JSON answer.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, image_data: Bytes) -> Result<Value, DetectorError>;
}

pub struct HttpDetector {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpDetector {
    pub fn new(config: &DetectionConfig) -> Result<Self, DetectorError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        let endpoint = config.endpoint_url();
        tracing::info!("Detection client configured: endpoint={}", endpoint);

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    #[instrument(skip(self, image_data), fields(endpoint = %self.endpoint))]
    async fn detect(&self, image_data: Bytes) -> Result<Value, DetectorError> {
        let part = multipart::Part::stream(image_data).file_name("image");
        let form = multipart::Form::new().part("file", part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("api_key", api_key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Detection service returned {}", status);
            return Err(DetectorError::Transport { status });
        }

        let body = response.json::<Value>().await?;
        Ok(body)
    }
}
