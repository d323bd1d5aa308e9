//! Image-Edit Collaborator
//!
//! Sends an evidence photo plus a free-text prompt to a generative image
//! model and returns the edited photo. Plain call/response: no retries,
//! no cancellation. Failures carry a message the UI can show as-is.

use std::time::Duration;
use async_trait::async_trait;
use base64::Engine;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::env_or;
use crate::game::progress::EvidenceImage;

/// Default image model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Image-edit errors.
#[derive(Debug, Error)]
pub enum ImageEditError {
    /// Transport failure.
    #[error("Image edit request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("Image edit API error ({code}): {body}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body
        body: String,
    },

    /// The model answered without an image.
    #[error("No image generated in response. The model might have returned only text.")]
    NoImageInResponse,

    /// No API key configured.
    #[error("Image editing is not configured")]
    NotConfigured,

    /// Image payload could not be decoded.
    #[error("Invalid image payload: {0}")]
    InvalidPayload(String),
}

/// Edits evidence images.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    /// Edit `image` according to `prompt`.
    async fn edit(&self, image: &EvidenceImage, prompt: &str) -> Result<EvidenceImage, ImageEditError>;
}

// =============================================================================
// CONFIG
// =============================================================================

/// Image-edit client configuration.
#[derive(Clone)]
pub struct ImageEditConfig {
    /// API key; None disables editing.
    pub api_key: Option<String>,
    /// Model name.
    pub model: String,
    /// API root URL.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for ImageEditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageEditConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ImageEditConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ImageEditConfig {
    /// Create config from environment variables.
    ///
    /// Key from `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let api_key = ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());

        Self {
            api_key,
            model: env_or("FIELDQUEST_IMAGE_MODEL", defaults.model),
            base_url: env_or("FIELDQUEST_IMAGE_BASE_URL", defaults.base_url),
            timeout: Duration::from_secs(env_or("FIELDQUEST_IMAGE_TIMEOUT_SECS", 60u64)),
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

fn build_request(image: &EvidenceImage, prompt: &str) -> GenerateContentRequest {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![
                Part {
                    inline_data: Some(InlineData {
                        mime_type: image.mime_type.clone(),
                        data: encoded,
                    }),
                    text: None,
                },
                Part { inline_data: None, text: Some(prompt.to_string()) },
            ],
        }],
    }
}

/// First inline image of the first candidate.
fn extract_image(response: GenerateContentResponse) -> Result<EvidenceImage, ImageEditError> {
    let inline = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .into_iter()
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data.filter(|d| !d.data.is_empty()))
        .ok_or(ImageEditError::NoImageInResponse)?;

    let data = base64::engine::general_purpose::STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| ImageEditError::InvalidPayload(e.to_string()))?;
    Ok(EvidenceImage::new(inline.mime_type, data))
}

// =============================================================================
// GEMINI CLIENT
// =============================================================================

/// `generateContent` client.
pub struct GeminiImageEditor {
    config: ImageEditConfig,
    http: reqwest::Client,
}

impl GeminiImageEditor {
    /// Create a client.
    pub fn new(config: ImageEditConfig) -> Result<Self, ImageEditError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    /// Is an API key present?
    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ImageEditor for GeminiImageEditor {
    async fn edit(&self, image: &EvidenceImage, prompt: &str) -> Result<EvidenceImage, ImageEditError> {
        let api_key = self.config.api_key.as_deref().ok_or(ImageEditError::NotConfigured)?;

        debug!(model = %self.config.model, bytes = image.size(), "image edit request");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&build_request(image, prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(code, "image edit API error");
            return Err(ImageEditError::Status { code, body });
        }

        extract_image(response.json().await?)
    }
}
