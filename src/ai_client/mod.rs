//! AIClient - Vision inference adapter
//!
//! ## Responsibilities
//!
//! - Define the `InferenceService` seam used by the detection pipeline
//! - Send image + instruction requests to Gemini `generateContent`
//! - Parse the reply text out of the response candidates
//!
//! Each model kind has its own API key.

use crate::config_store::ModelKind;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inference call failure
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("inference unavailable: {0}")]
    Unavailable(String),
}

/// One image + instruction request
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Base64-encoded JPEG
    pub image_base64: String,
    pub system_prompt: String,
    pub instruction: String,
}

/// Remote vision-language inference
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Reply text for the request
    async fn generate(
        &self,
        kind: ModelKind,
        request: InferenceRequest,
    ) -> std::result::Result<String, InferenceError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub fire_api_key: Option<String>,
    pub helmet_api_key: Option<String>,
    /// Transport timeout; the pipeline applies its own shorter one
    pub http_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash-latest".to_string(),
            temperature: 0.1,
            fire_api_key: None,
            helmet_api_key: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl GeminiConfig {
    fn api_key(&self, kind: ModelKind) -> Option<&str> {
        let key = match kind {
            ModelKind::Fire => self.fire_api_key.as_deref(),
            ModelKind::Helmet => self.helmet_api_key.as_deref(),
        };
        key.filter(|k| !k.is_empty())
    }
}

// ========================================
// Wire types
// ========================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'static str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
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
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_body<'a>(&self, request: &'a InferenceRequest) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![RequestPart::Text {
                    text: &request.system_prompt,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    RequestPart::Text {
                        text: &request.instruction,
                    },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: &request.image_base64,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
            },
        }
    }
}

#[async_trait]
impl InferenceService for GeminiClient {
    async fn generate(
        &self,
        kind: ModelKind,
        request: InferenceRequest,
    ) -> std::result::Result<String, InferenceError> {
        let api_key = self.config.api_key(kind).ok_or_else(|| {
            InferenceError::Unavailable(format!("no API key configured for {} model", kind))
        })?;

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&self.build_body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.config.http_timeout)
                } else {
                    InferenceError::Unavailable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Unavailable(format!(
                "Gemini request failed: {} - {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| InferenceError::Unavailable(format!("invalid response: {}", e)))?;

        parsed
            .text()
            .ok_or_else(|| InferenceError::Unavailable("empty response".to_string()))
    }
}
