use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{BackendError, StoreError};
use crate::types::{DocumentFilter, DocumentId, IndexedVector, SearchResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `gemini:text-embedding-004`).
    fn id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Providers with a native batch endpoint override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn id(&self) -> &str;

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, BackendError>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embedder every stored vector was produced by.
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;

    async fn add(&self, vectors: Vec<IndexedVector>) -> Result<(), StoreError>;

    /// Drop every vector of `document_id` and insert `vectors` as one visible unit.
    async fn replace_document(&self, document_id: &str, vectors: Vec<IndexedVector>) -> Result<(), StoreError>;

    /// Highest similarity first; ties by ascending chunk id. The filter is
    /// applied before the top-k cut.
    async fn search(
        &self,
        query_embedding: &[f32],
        filter: Option<&DocumentFilter>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError>;

    async fn remove(&self, document_id: &str) -> Result<usize, StoreError>;
    async fn count(&self) -> Result<usize, StoreError>;
    async fn contains_any(&self, filter: &DocumentFilter) -> Result<bool, StoreError>;
    async fn document_ids(&self) -> Result<BTreeSet<DocumentId>, StoreError>;

    /// Called once this store becomes the served index after a rebuild.
    /// Persistent stores record it so the next process start loads it.
    async fn commit(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Creates fresh, empty stores for index rebuilds.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn create(&self, embedder_id: &str, dim: usize) -> Result<Arc<dyn VectorStore>, StoreError>;
}

/// Shared validation for store adapters: binding, dimension and ownership.
pub fn validate_vectors(
    store_embedder: &str,
    dim: usize,
    document_id: Option<&str>,
    vectors: &[IndexedVector],
) -> Result<(), StoreError> {
    for v in vectors {
        if v.embedder_id != store_embedder {
            return Err(StoreError::ModelMismatch { expected: store_embedder.to_string(), actual: v.embedder_id.clone() });
        }
        if v.embedding.len() != dim {
            return Err(StoreError::DimensionMismatch { expected: dim, actual: v.embedding.len() });
        }
        if let Some(doc) = document_id {
            if v.metadata.document_id != doc {
                return Err(StoreError::ForeignDocument {
                    chunk_id: v.chunk_id.clone(),
                    expected: doc.to_string(),
                    actual: v.metadata.document_id.clone(),
                });
            }
        }
    }
    let mut seen = BTreeSet::new();
    for v in vectors {
        if !seen.insert(v.chunk_id.as_str()) {
            return Err(StoreError::DuplicateChunk(v.chunk_id.clone()));
        }
    }
    Ok(())
}
