use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::parser::excerpt;
use crate::config::VisionConfig;

#[derive(Debug, thiserror::Error)]
pub enum VisionCallError {
    #[error("vision request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("vision request timed out after {0:?}")]
    Timeout(Duration),
    #[error("vision API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("vision API returned no text")]
    EmptyResponse,
    #[error("failed to decode vision API response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// One round trip to a hosted multimodal model.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn generate(
        &self,
        image: Bytes,
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, VisionCallError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

fn build_request<'a>(image: &[u8], mime_type: &'a str, prompt: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Content {
            parts: vec![
                Part::Text { text: prompt },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type,
                        data: general_purpose::STANDARD.encode(image),
                    },
                },
            ],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
        },
    }
}

/// Google Gemini `generateContent` adapter.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(cfg: &VisionConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            timeout: cfg.timeout,
        })
    }

    fn endpoint(&self) -> String {
        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        format!("{}/models/{}:generateContent", self.api_base, model)
    }

    fn map_send_error(&self, e: reqwest::Error) -> VisionCallError {
        if e.is_timeout() {
            VisionCallError::Timeout(self.timeout)
        } else {
            VisionCallError::Transport(e)
        }
    }
}

#[async_trait]
impl VisionClient for GeminiClient {
    async fn generate(
        &self,
        image: Bytes,
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, VisionCallError> {
        let body = build_request(&image, mime_type, prompt);
        debug!(model = %self.model, bytes = image.len(), %mime_type, "calling vision model");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = excerpt(&response.text().await.unwrap_or_default());
            error!(%status, body = %body, "vision API error");
            return Err(VisionCallError::Status { status, body });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                VisionCallError::Timeout(self.timeout)
            } else {
                VisionCallError::Decode(e)
            }
        })?;
        parsed.into_text().ok_or(VisionCallError::EmptyResponse)
    }
}
