//! In-process text generation with a quantized llama-family GGUF model.
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama::ModelWeights;
use papersmith_core::config::{expand_path, LocalSettings};
use papersmith_core::error::BackendError;
use papersmith_core::traits::Generator;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::join_error;
use crate::kind::BackendKind;

const EOS_TOKENS: [&str; 3] = ["</s>", "<|eot_id|>", "<|end_of_text|>"];

struct LlamaModel {
    weights: ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos: Vec<u32>,
}

impl LlamaModel {
    fn load(model_path: &Path, tokenizer_path: &Path, device: Device) -> Result<Self> {
        info!(model = %model_path.display(), "Loading GGUF generation model");
        let mut file = std::fs::File::open(model_path).with_context(|| format!("opening {}", model_path.display()))?;
        let content = gguf_file::Content::read(&mut file).map_err(|e| e.with_path(model_path))?;
        let weights = ModelWeights::from_gguf(content, &mut file, &device)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let eos = EOS_TOKENS.iter().filter_map(|t| tokenizer.token_to_id(t)).collect();
        info!("Generation model loaded");
        Ok(Self { weights, tokenizer, device, eos })
    }

    fn generate(&mut self, prompt: &str, max_tokens: usize, sampler: &mut LogitsProcessor) -> Result<String> {
        let prompt_ids = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?
            .get_ids()
            .to_vec();
        let mut generated: Vec<u32> = Vec::new();
        // index_pos 0 resets the KV cache from the previous prompt.
        let input = Tensor::new(prompt_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = self.weights.forward(&input, 0)?.squeeze(0)?;
        let mut next = sampler.sample(&logits)?;
        while generated.len() < max_tokens && !self.eos.contains(&next) {
            generated.push(next);
            let input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
            let logits = self.weights.forward(&input, prompt_ids.len() + generated.len() - 1)?.squeeze(0)?;
            next = sampler.sample(&logits)?;
        }
        debug!(prompt_tokens = prompt_ids.len(), generated = generated.len(), "generation finished");
        self.tokenizer.decode(&generated, true).map_err(|e| anyhow!("Detokenization failed: {}", e))
    }
}

/// The model is stateful (KV cache), so calls are serialized.
pub struct LocalGenerator {
    model: Arc<Mutex<LlamaModel>>,
    id: String,
    seed: u64,
    temperature: f64,
}

impl LocalGenerator {
    pub fn load(kind: BackendKind, settings: &LocalSettings, temperature: f32, device: Device) -> Result<Self, BackendError> {
        let model_path = expand_path(&settings.generation_model_path);
        let tokenizer_path = expand_path(&settings.generation_tokenizer_path);
        let model = LlamaModel::load(&model_path, &tokenizer_path, device)
            .map_err(|e| BackendError::unavailable(kind.as_str(), format!("{:#}", e)))?;
        let name = model_path.file_stem().and_then(|n| n.to_str()).unwrap_or("gguf");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            id: format!("local:{}", name),
            seed: settings.seed,
            temperature: f64::from(temperature),
        })
    }
}

#[async_trait]
impl Generator for LocalGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, BackendError> {
        let model = Arc::clone(&self.model).lock_owned().await;
        let prompt = prompt.to_string();
        let id = self.id.clone();
        let temperature = (self.temperature > 0.0).then_some(self.temperature);
        let seed = self.seed;
        let text = tokio::task::spawn_blocking(move || {
            let mut model = model;
            let mut sampler = LogitsProcessor::new(seed, temperature, None);
            model.generate(&prompt, max_tokens, &mut sampler)
        })
        .await
        .map_err(|e| join_error(&self.id, e))?
        .map_err(|e| BackendError::invalid_response(&id, format!("{:#}", e)))?;
        if text.trim().is_empty() {
            return Err(BackendError::invalid_response(&self.id, "model produced no text"));
        }
        Ok(text.trim().to_string())
    }
}
