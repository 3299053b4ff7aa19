//! Google Gemini over the Generative Language REST API.
//!
//! - Embeddings: `POST {base}/models/{model}:embedContent` and
//!   `:batchEmbedContents`
//! - Text: `POST {base}/models/{model}:generateContent`
//! - Auth: `x-goog-api-key` header
use async_trait::async_trait;
use papersmith_core::config::BackendSettings;
use papersmith_core::error::BackendError;
use papersmith_core::traits::{Embedder, Generator};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{Auth, HttpJson};
use crate::retry::RetryPolicy;

const BACKEND: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
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
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

struct GeminiClient {
    http: HttpJson,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let api_key = settings
            .gemini
            .resolved_api_key()
            .ok_or_else(|| BackendError::unavailable(BACKEND, "no API key configured (backend.gemini.api_key or GOOGLE_API_KEY)"))?;
        Ok(Self {
            http: HttpJson::new(BACKEND, settings.request_timeout(), RetryPolicy::from_settings(settings))?,
            api_key,
            base_url: settings.gemini.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, body: &serde_json::Value) -> Result<T, BackendError> {
        self.http.post(url, Auth::Header(API_KEY_HEADER, &self.api_key), body).await
    }
}

pub struct GeminiEmbedder {
    client: GeminiClient,
    model: String,
    id: String,
}

impl GeminiEmbedder {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let model = settings.gemini.embedding_model.clone();
        info!(%model, "using Gemini embeddings");
        Ok(Self { client: GeminiClient::new(settings)?, id: format!("gemini:{}", model), model })
    }

    fn request_part(&self, text: &str) -> serde_json::Value {
        json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let url = self.client.url(&self.model, "embedContent");
        let response: EmbedResponse = self.client.post(&url, &self.request_part(text)).await?;
        non_empty(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.client.url(&self.model, "batchEmbedContents");
        let requests: Vec<_> = texts.iter().map(|t| self.request_part(t)).collect();
        let response: BatchEmbedResponse = self.client.post(&url, &json!({ "requests": requests })).await?;
        if response.embeddings.len() != texts.len() {
            return Err(BackendError::invalid_response(
                BACKEND,
                format!("expected {} embeddings, got {}", texts.len(), response.embeddings.len()),
            ));
        }
        response.embeddings.into_iter().map(|e| non_empty(e.values)).collect()
    }
}

fn non_empty(values: Vec<f32>) -> Result<Vec<f32>, BackendError> {
    if values.is_empty() {
        Err(BackendError::invalid_response(BACKEND, "empty embedding"))
    } else {
        Ok(values)
    }
}

pub struct GeminiGenerator {
    client: GeminiClient,
    model: String,
    id: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let model = settings.gemini.generation_model.clone();
        info!(%model, "using Gemini generation");
        Ok(Self {
            client: GeminiClient::new(settings)?,
            id: format!("gemini:{}", model),
            model,
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, BackendError> {
        let url = self.client.url(&self.model, "generateContent");
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "maxOutputTokens": max_tokens, "temperature": self.temperature },
        });
        let response: GenerateResponse = self.client.post(&url, &body).await?;
        extract_text(response)
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, BackendError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        Err(BackendError::invalid_response(BACKEND, "response carried no text"))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "Gradient "}, {"text": "descent."}]}},
                               {"content": {"parts": [{"text": "ignored"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Gradient descent.");
    }

    #[test]
    fn blocked_response_is_invalid() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        assert!(matches!(extract_text(response), Err(BackendError::InvalidResponse { .. })));
    }

    #[test]
    fn missing_api_key_is_unavailable() {
        let mut settings = BackendSettings::default();
        settings.gemini.api_key = None;
        if std::env::var("GOOGLE_API_KEY").is_ok() {
            return;
        }
        let err = GeminiEmbedder::new(&settings).err().unwrap();
        assert!(matches!(err, BackendError::Unavailable { transient: false, .. }));
    }
}
