//! OpenAI (and OpenAI-compatible) embeddings and chat completions.
use async_trait::async_trait;
use papersmith_core::config::BackendSettings;
use papersmith_core::error::BackendError;
use papersmith_core::traits::{Embedder, Generator};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{Auth, HttpJson};
use crate::retry::RetryPolicy;

const BACKEND: &str = "openai";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

struct OpenAiClient {
    http: HttpJson,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let api_key = settings
            .openai
            .resolved_api_key()
            .ok_or_else(|| BackendError::unavailable(BACKEND, "no API key configured (backend.openai.api_key or OPENAI_API_KEY)"))?;
        Ok(Self {
            http: HttpJson::new(BACKEND, settings.request_timeout(), RetryPolicy::from_settings(settings))?,
            api_key,
            base_url: settings.openai.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T, BackendError> {
        let url = format!("{}/{}", self.base_url, path);
        self.http.post(&url, Auth::Bearer(&self.api_key), body).await
    }
}

pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    id: String,
}

impl OpenAiEmbedder {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let model = settings.openai.embedding_model.clone();
        info!(%model, "using OpenAI embeddings");
        Ok(Self { client: OpenAiClient::new(settings)?, id: format!("openai:{}", model), model })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| BackendError::invalid_response(BACKEND, "empty embedding list"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": self.model, "input": texts });
        let response: EmbeddingResponse = self.client.post("embeddings", &body).await?;
        order_embeddings(response, texts.len())
    }
}

/// Results may arrive out of order; `index` maps them back to inputs.
fn order_embeddings(mut response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, BackendError> {
    if response.data.len() != expected {
        return Err(BackendError::invalid_response(
            BACKEND,
            format!("expected {} embeddings, got {}", expected, response.data.len()),
        ));
    }
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

pub struct OpenAiGenerator {
    client: OpenAiClient,
    model: String,
    id: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let model = settings.openai.generation_model.clone();
        info!(%model, "using OpenAI chat completions");
        Ok(Self {
            client: OpenAiClient::new(settings)?,
            id: format!("openai:{}", model),
            model,
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, BackendError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": self.temperature,
        });
        let response: ChatResponse = self.client.post("chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| BackendError::invalid_response(BACKEND, "completion carried no text"))
    }
}
