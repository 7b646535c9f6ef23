use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;

const API_BASE: &str = "https://api.cloudflare.com/client/v4/accounts";

/// Text in, text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AiError>;
}

/// Prompt (plus optional seed image) in, raster payload out.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<ImagePayload, AiError>;
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub slot_index: i32,
    pub prompt: String,
    pub reference_image: Option<Vec<u8>>,
}

/// Raw image as returned by the model, before decoding.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    Base64(String),
    Binary(Vec<u8>),
}

/// Model names used by the Workers AI client.
#[derive(Debug, Clone)]
pub struct WorkersAiModels {
    pub text: String,
    pub image: String,
    pub img2img: String,
}

/// Client for Cloudflare Workers AI text and image models.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    models: WorkersAiModels,
}

#[derive(Deserialize)]
struct TextResponse {
    result: TextResult,
    #[serde(default = "default_success")]
    success: bool,
}

#[derive(Deserialize)]
struct TextResult {
    response: String,
}

#[derive(Deserialize)]
struct ImageJsonResponse {
    result: ImageJsonResult,
}

#[derive(Deserialize)]
struct ImageJsonResult {
    image: String,
}

fn default_success() -> bool {
    true
}

impl WorkersAiClient {
    /// `request_timeout` is a transport-level ceiling; the pipeline applies its own per-call deadlines on top.
    pub fn new(
        account_id: &str,
        api_token: &str,
        models: WorkersAiModels,
        request_timeout: Duration,
    ) -> Result<Self, AiError> {
        let http = Client::builder()
            .user_agent(concat!("social-post-gen/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            models,
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/{}/ai/run/{}", API_BASE, self.account_id, model)
    }
}

#[async_trait]
impl TextGenerator for WorkersAiClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AiError> {
        let request_body = serde_json::json!({
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": 2048
        });

        let response = self
            .http
            .post(self.model_url(&self.models.text))
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        let body: TextResponse = response.json().await?;
        if !body.success {
            return Err(AiError::Rejected(format!(
                "text model {} reported failure",
                self.models.text
            )));
        }

        Ok(body.result.response)
    }
}

#[async_trait]
impl ImageGenerator for WorkersAiClient {
    async fn generate(&self, request: &ImageRequest) -> Result<ImagePayload, AiError> {
        let (model, request_body) = match &request.reference_image {
            Some(seed) => (
                &self.models.img2img,
                serde_json::json!({
                    "prompt": request.prompt,
                    "image": seed,
                    "strength": 0.6
                }),
            ),
            None => (
                &self.models.image,
                serde_json::json!({
                    "prompt": request.prompt,
                    "steps": 4
                }),
            ),
        };

        let response = self
            .http
            .post(self.model_url(model))
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        // Some models answer with JSON carrying base64, others stream the PNG bytes.
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let body: ImageJsonResponse = response.json().await?;
            Ok(ImagePayload::Base64(body.result.image))
        } else {
            let bytes = response.bytes().await?;
            Ok(ImagePayload::Binary(bytes.to_vec()))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model rejected request: {0}")]
    Rejected(String),
}
