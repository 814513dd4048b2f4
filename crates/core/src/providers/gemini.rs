//! Client for the Google Generative Language REST API.
//!
//! One [`GeminiClient`] carries the credential and HTTP client; it serves model
//! listing and text generation, and hands out a [`GeminiEmbedder`] for the
//! embedding endpoint.

use crate::embeddings::Embedder;
use crate::traits::{LanguageModel, ModelCatalog};
use crate::{ConversationTurn, EmbedError, LlmError, Role};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const GENERATE_METHOD: &str = "generateContent";

#[derive(Clone)]
pub struct GeminiClient {
    base_url: Url,
    api_key: String,
    client: Client,
    model: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::Unauthorized("empty API key".to_string()));
        }

        Ok(Self {
            base_url: Url::parse(base_url.trim_end_matches('/'))?,
            api_key,
            client: Client::builder().timeout(timeout).build()?,
            model: String::new(),
        })
    }

    /// Same credential and connection pool, generating with `model`.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: strip_models_prefix(&model.into()).to_string(),
            ..self.clone()
        }
    }

    pub fn embedder(&self, model: impl Into<String>, dimensions: usize, max_input_chars: usize) -> GeminiEmbedder {
        GeminiEmbedder {
            client: self.clone(),
            model: strip_models_prefix(&model.into()).to_string(),
            dimensions,
            max_input_chars,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("x-goog-api-key", &self.api_key)
    }
}

fn strip_models_prefix(name: &str) -> &str {
    name.strip_prefix("models/").unwrap_or(name)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    model: String,
    content: Content,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

fn usable_models(response: ListModelsResponse) -> Vec<String> {
    response
        .models
        .into_iter()
        .filter(|model| {
            model
                .supported_generation_methods
                .iter()
                .any(|method| method == GENERATE_METHOD)
        })
        .map(|model| strip_models_prefix(&model.name).to_string())
        .collect()
}

fn build_generate_request(prompt: &str, history: Option<&[ConversationTurn]>) -> GenerateRequest {
    let mut contents: Vec<Content> = history
        .unwrap_or_default()
        .iter()
        .map(|turn| Content {
            role: Some(
                match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_string(),
            ),
            parts: vec![Part {
                text: turn.text.clone(),
            }],
        })
        .collect();

    contents.push(Content {
        role: Some("user".to_string()),
        parts: vec![Part {
            text: prompt.to_string(),
        }],
    });

    GenerateRequest { contents }
}

fn response_text(response: GenerateResponse) -> Result<String, LlmError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(LlmError::InvalidResponse(format!("prompt blocked: {reason}")));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response has no candidates".to_string()))?;

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse(format!(
            "empty candidate (finish reason {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

fn classify_llm_status(status: u16, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Unauthorized(body),
        400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
            LlmError::Unauthorized(body)
        }
        429 => LlmError::RateLimited,
        _ => LlmError::Provider {
            status,
            details: body,
        },
    }
}

fn classify_embed_status(status: u16, body: String, model: &str, chars: usize, limit: usize) -> EmbedError {
    let lowered = body.to_lowercase();
    if status == 400 && (lowered.contains("exceeds") || lowered.contains("too long")) {
        return EmbedError::TextTooLong {
            model: model.to_string(),
            chars,
            limit,
        };
    }

    EmbedError::Provider {
        status,
        details: body,
    }
}

#[async_trait]
impl ModelCatalog for GeminiClient {
    async fn list_available_models(&self) -> Result<Vec<String>, LlmError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .authorized(self.client.get(self.endpoint("models")))
                .query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_llm_status(status.as_u16(), body));
            }

            let page: ListModelsResponse = response.json().await?;
            page_token = page.next_page_token.clone().filter(|token| !token.is_empty());
            models.extend(usable_models(page));

            if page_token.is_none() {
                break;
            }
        }

        Ok(models)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        history: Option<&[ConversationTurn]>,
    ) -> Result<String, LlmError> {
        if self.model.is_empty() {
            return Err(LlmError::InvalidResponse(
                "no generation model selected".to_string(),
            ));
        }

        let url = self.endpoint(&format!("models/{}:{GENERATE_METHOD}", self.model));
        let response = self
            .authorized(self.client.post(url))
            .json(&build_generate_request(prompt, history))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_llm_status(status.as_u16(), body));
        }

        response_text(response.json().await?)
    }
}

#[derive(Clone)]
pub struct GeminiEmbedder {
    client: GeminiClient,
    model: String,
    dimensions: usize,
    max_input_chars: usize,
}

impl GeminiEmbedder {
    fn check_length(&self, texts: &[String]) -> Result<(), EmbedError> {
        let longest = texts.iter().map(|text| text.chars().count()).max().unwrap_or(0);
        if longest > self.max_input_chars {
            return Err(EmbedError::TextTooLong {
                model: self.model.clone(),
                chars: longest,
                limit: self.max_input_chars,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.check_length(texts)?;

        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: format!("models/{}", self.model),
                    content: Content {
                        role: None,
                        parts: vec![Part { text: text.clone() }],
                    },
                    output_dimensionality: self.dimensions,
                })
                .collect(),
        };

        let url = self
            .client
            .endpoint(&format!("models/{}:batchEmbedContents", self.model));
        let response = self
            .client
            .authorized(self.client.client.post(url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let longest = texts.iter().map(|text| text.chars().count()).max().unwrap_or(0);
            return Err(classify_embed_status(
                status.as_u16(),
                body,
                &self.model,
                longest,
                self.max_input_chars,
            ));
        }

        let parsed: BatchEmbedResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbedError::InvalidResponse(format!(
                "{} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        parsed
            .embeddings
            .into_iter()
            .map(|embedding| {
                if embedding.values.len() == self.dimensions {
                    Ok(embedding.values)
                } else {
                    Err(EmbedError::InvalidResponse(format!(
                        "embedding has {} dimensions, expected {}",
                        embedding.values.len(),
                        self.dimensions
                    )))
                }
            })
            .collect()
    }
}
