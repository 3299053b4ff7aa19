//! In-process XLM-RoBERTa sentence embeddings (BGE-M3 by default).
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use papersmith_core::config::{expand_path, LocalSettings};
use papersmith_core::error::BackendError;
use papersmith_core::traits::Embedder;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::{join_error, pool::masked_mean_l2, tokenize::tokenize_on_device};
use crate::kind::BackendKind;

struct EmbeddingModel {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

impl EmbeddingModel {
    fn load(model_dir: &Path, device: Device, max_len: usize) -> Result<Self> {
        info!(dir = %model_dir.display(), "Loading XLM-R embedding model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(
            &std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?,
        )?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights: HashMap<String, Tensor> = candle_core::pickle::read_all(&weights_path)
            .with_context(|| format!("reading {}", weights_path.display()))?
            .into_iter()
            .collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("Embedding model loaded");
        Ok(Self { model, tokenizer, device, max_len })
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vector = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1::<f32>()?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, dim = vector.len(), "embedded text");
        Ok(vector)
    }
}

/// Runs the model on the blocking pool so async callers are not stalled.
pub struct LocalEmbedder {
    model: Arc<EmbeddingModel>,
    id: String,
}

impl LocalEmbedder {
    pub fn load(kind: BackendKind, settings: &LocalSettings, device: Device) -> Result<Self, BackendError> {
        let dir: PathBuf = expand_path(&settings.embedding_model_dir);
        let model = EmbeddingModel::load(&dir, device, settings.embedding_max_len)
            .map_err(|e| BackendError::unavailable(kind.as_str(), format!("{:#}", e)))?;
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("xlm-roberta");
        // Vectors do not depend on the device, so both local kinds share an id.
        Ok(Self { model: Arc::new(model), id: format!("local:{}", name) })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| BackendError::invalid_response(&self.id, "no embedding produced"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| model.embed_text(t).map_err(|e| BackendError::invalid_response(&id, format!("{:#}", e))))
                .collect()
        })
        .await
        .map_err(|e| join_error(&self.id, e))?
    }
}
