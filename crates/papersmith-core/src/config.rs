//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_BACKEND__EMBEDDING=openai`).
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Like [`Config::load`], reading the TOML files from `dir`.
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    /// Extract and validate the typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub rag: RagSettings,
    pub chunking: ChunkingSettings,
    pub store: StoreSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.rag.support_threshold) {
            return Err(Error::InvalidConfig(format!(
                "rag.support_threshold must be within [0, 1], got {}",
                self.rag.support_threshold
            )));
        }
        let nonzero = [
            ("rag.top_k", self.rag.top_k),
            ("rag.max_context_chars", self.rag.max_context_chars),
            ("rag.max_answer_tokens", self.rag.max_answer_tokens),
            ("chunking.target_chars", self.chunking.target_chars),
            ("chunking.embed_batch_size", self.chunking.embed_batch_size),
            ("backend.max_retries", self.backend.max_retries as usize),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be greater than zero", key)));
            }
        }
        if self.backend.embedding.trim().is_empty() || self.backend.generation.trim().is_empty() {
            return Err(Error::InvalidConfig("backend.embedding and backend.generation must be set".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Backend identifier for the embedding role.
    pub embedding: String,
    /// Backend identifier for the generation role.
    pub generation: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub temperature: f32,
    pub gemini: GeminiSettings,
    pub openai: OpenAiSettings,
    pub local: LocalSettings,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            embedding: "gemini".to_string(),
            generation: "gemini".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
            temperature: 0.7,
            gemini: GeminiSettings::default(),
            openai: OpenAiSettings::default(),
            local: LocalSettings::default(),
        }
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            generation_model: "gemini-2.0-flash".to_string(),
        }
    }
}

impl GeminiSettings {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|k| !k.is_empty()).or_else(|| env::var("GOOGLE_API_KEY").ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            generation_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl OpenAiSettings {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|k| !k.is_empty()).or_else(|| env::var("OPENAI_API_KEY").ok())
    }
}

/// In-process candle models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Directory holding `tokenizer.json`, `config.json` and `pytorch_model.bin`
    /// of an XLM-RoBERTa embedding model (BGE-M3 by default).
    pub embedding_model_dir: String,
    pub embedding_max_len: usize,
    /// GGUF weights of a llama-family chat model.
    pub generation_model_path: String,
    pub generation_tokenizer_path: String,
    pub seed: u64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            embedding_model_dir: "models/bge-m3".to_string(),
            embedding_max_len: 256,
            generation_model_path: "models/llm/model.gguf".to_string(),
            generation_tokenizer_path: "models/llm/tokenizer.json".to_string(),
            seed: 299_792_458,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ja,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub support_threshold: f32,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub max_answer_tokens: usize,
    pub attempt_timeout_secs: u64,
    pub language: Language,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            support_threshold: 0.6,
            top_k: 5,
            max_context_chars: 8000,
            max_answer_tokens: 512,
            attempt_timeout_secs: 120,
            language: Language::En,
        }
    }
}

impl RagSettings {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub target_chars: usize,
    pub embed_batch_size: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { target_chars: 512, embed_batch_size: 32 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Lance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub uri: String,
    pub table: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { kind: StoreKind::Lance, uri: "./data/lancedb".to_string(), table: "paper_chunks".to_string() }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().expect("defaults are valid");
        assert!((settings.rag.support_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(settings.chunking.target_chars, 512);
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut settings = Settings::default();
        settings.rag.support_threshold = 1.5;
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn expand_path_keeps_plain_relative_paths() {
        assert_eq!(expand_path("data/lancedb"), PathBuf::from("data/lancedb"));
        assert_eq!(expand_path("/abs/idx"), PathBuf::from("/abs/idx"));
    }
}
