use crate::config::GenerationConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Text generation service answered with status {status}")]
    Transport { status: StatusCode },
    #[error("Text generation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Text generation service returned no choices")]
    EmptyResponse,
}

/// Produces a gemological write-up for the detected labels.
#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    async fn describe(&self, labels: &[String]) -> Result<String, GenerationError>;
}

// --- OpenAI-compatible wire structs ---

#[derive(Serialize, Debug)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Debug)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub fn system_instruction(currency: &str) -> String {
    format!(
        "You are an expert gemologist. For the gemstone or gemstones named by the user, \
         write a short Markdown report with these sections in order: \
         an introductory sentence presenting the stone; its rarity; \
         where it is found geographically; a typical price range per carat in {currency}; \
         and practical tips for preserving and caring for it. \
         When several gemstones are given, cover each of them."
    )
}

pub fn user_message(labels: &[String]) -> String {
    labels.join(", ")
}

pub struct ChatGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    currency: String,
    max_tokens: u32,
}

impl ChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        tracing::info!(
            "Text generation client configured: endpoint={}, model={}",
            endpoint,
            config.model
        );

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            currency: config.currency.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn build_request(&self, labels: &[String]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_instruction(&self.currency),
                },
                ChatMessage {
                    role: "user",
                    content: user_message(labels),
                },
            ],
            temperature: 0.0,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl TextGenerator for ChatGenerator {
    #[instrument(skip(self), fields(model = %self.model))]
    async fn describe(&self, labels: &[String]) -> Result<String, GenerationError> {
        let request = self.build_request(labels);

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Text generation service returned {}", status);
            return Err(GenerationError::Transport { status });
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(GenerationError::EmptyResponse)
    }
}
