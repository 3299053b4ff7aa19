use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use papersmith_core::error::BackendError;
use papersmith_core::traits::Embedder;
use twox_hash::XxHash64;

pub const FAKE_DIM: usize = 1024;

/// Deterministic bag-of-words hashing embedder for tests and offline runs.
/// Texts sharing words get similar vectors; no model files needed.
pub struct FakeEmbedder {
    dim: usize,
    id: String,
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new(FAKE_DIM)
    }
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1), id: format!("fake:xxhash-{}", dim.max(1)) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            v[idx] += 0.5 + ((h >> 32) as u32) as f32 / u32::MAX as f32;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            // Empty text still needs a unit vector.
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn vectors_are_unit_length_and_deterministic() {
        let e = FakeEmbedder::default();
        let texts = vec!["hello world".to_string(), "hello world".to_string()];
        let embs = e.embed_batch(&texts).await.unwrap();
        assert_eq!(embs[0].len(), FAKE_DIM);
        let norm: f32 = embs[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() <= 1e-3, "norm={norm}");
        assert_eq!(embs[0], embs[1]);
    }

    #[test]
    fn shared_words_score_higher_than_unrelated_text() {
        let e = FakeEmbedder::default();
        let q = e.embed_sync("What is gradient descent?");
        let related = e.embed_sync("Gradient descent follows the negative gradient.");
        let unrelated = e.embed_sync("Photosynthesis converts light into chemical energy.");
        assert!(cosine(&q, &related) > cosine(&q, &unrelated));
    }
}
