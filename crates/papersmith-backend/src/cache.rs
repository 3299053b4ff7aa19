use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use papersmith_core::error::BackendError;
use papersmith_core::traits::Embedder;
use parking_lot::Mutex;
use tracing::debug;

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

#[derive(Default)]
struct CacheState {
    vectors: HashMap<blake3::Hash, Vec<f32>>,
    order: VecDeque<blake3::Hash>,
}

/// Memoizes another embedder's vectors by blake3 content hash, evicting the
/// oldest entry beyond `capacity`.
pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self { inner, capacity: capacity.max(1), state: Mutex::new(CacheState::default()) }
    }

    pub fn len(&self) -> usize {
        self.state.lock().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &blake3::Hash) -> Option<Vec<f32>> {
        self.state.lock().vectors.get(key).cloned()
    }

    fn store(&self, key: blake3::Hash, vector: Vec<f32>) {
        let mut state = self.state.lock();
        if state.vectors.insert(key, vector).is_none() {
            state.order.push_back(key);
        }
        while state.order.len() > self.capacity {
            if let Some(old) = state.order.pop_front() {
                state.vectors.remove(&old);
            }
        }
    }
}

fn content_key(text: &str) -> blake3::Hash {
    blake3::hash(text.as_bytes())
}

#[async_trait]
impl Embedder for CachingEmbedder {
    /// Cached vectors are the inner embedder's vectors, so the id is too.
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let key = content_key(text);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        self.store(key, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let keys: Vec<blake3::Hash> = texts.iter().map(|t| content_key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.lookup(k)).collect();
        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        debug!(hits = texts.len() - missing.len(), misses = missing.len(), "embedding cache lookup");
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&batch).await?;
            if fresh.len() != batch.len() {
                return Err(BackendError::invalid_response(
                    self.inner.id(),
                    format!("expected {} embeddings, got {}", batch.len(), fresh.len()),
                ));
            }
            for (i, vector) in missing.into_iter().zip(fresh) {
                self.store(keys[i], vector.clone());
                out[i] = Some(vector);
            }
        }
        Ok(out.into_iter().flatten().collect())
    }
}
