use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use papersmith_core::error::StoreError;
use papersmith_core::traits::{validate_vectors, StoreFactory, VectorStore};
use papersmith_core::types::{ChunkId, DocumentFilter, DocumentId, IndexedVector, SearchResult};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{cosine_similarity, rank};

/// Exact brute-force store. Every mutation holds the write lock for its whole
/// duration, so readers never observe a half-applied change.
pub struct MemoryStore {
    embedder_id: String,
    dim: usize,
    vectors: RwLock<BTreeMap<ChunkId, IndexedVector>>,
}

impl MemoryStore {
    pub fn new(embedder_id: impl Into<String>, dim: usize) -> Self {
        Self { embedder_id: embedder_id.into(), dim, vectors: RwLock::new(BTreeMap::new()) }
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn add(&self, vectors: Vec<IndexedVector>) -> Result<(), StoreError> {
        validate_vectors(&self.embedder_id, self.dim, None, &vectors)?;
        let mut map = self.vectors.write().await;
        if let Some(dup) = vectors.iter().find(|v| map.contains_key(&v.chunk_id)) {
            return Err(StoreError::DuplicateChunk(dup.chunk_id.clone()));
        }
        for v in vectors {
            map.insert(v.chunk_id.clone(), v);
        }
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, vectors: Vec<IndexedVector>) -> Result<(), StoreError> {
        validate_vectors(&self.embedder_id, self.dim, Some(document_id), &vectors)?;
        let mut map = self.vectors.write().await;
        map.retain(|_, v| v.metadata.document_id != document_id);
        debug!(document_id, chunks = vectors.len(), "replacing document vectors");
        for v in vectors {
            map.insert(v.chunk_id.clone(), v);
        }
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        filter: Option<&DocumentFilter>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        if query_embedding.len() != self.dim {
            return Err(StoreError::DimensionMismatch { expected: self.dim, actual: query_embedding.len() });
        }
        let filter = DocumentFilter::normalize(filter);
        let map = self.vectors.read().await;
        let scored = map
            .values()
            .filter(|v| filter.map_or(true, |f| f.contains(&v.metadata.document_id)))
            .map(|v| {
                let result = SearchResult {
                    chunk_id: v.chunk_id.clone(),
                    text: v.text.clone(),
                    score: 0.0,
                    metadata: v.metadata.clone(),
                };
                (cosine_similarity(query_embedding, &v.embedding), result)
            })
            .collect();
        Ok(rank(scored, top_k))
    }

    async fn remove(&self, document_id: &str) -> Result<usize, StoreError> {
        let mut map = self.vectors.write().await;
        let before = map.len();
        map.retain(|_, v| v.metadata.document_id != document_id);
        Ok(before - map.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.vectors.read().await.len())
    }

    async fn contains_any(&self, filter: &DocumentFilter) -> Result<bool, StoreError> {
        Ok(self.vectors.read().await.values().any(|v| filter.contains(&v.metadata.document_id)))
    }

    async fn document_ids(&self) -> Result<BTreeSet<DocumentId>, StoreError> {
        Ok(self.vectors.read().await.values().map(|v| v.metadata.document_id.clone()).collect())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStoreFactory;

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    async fn create(&self, embedder_id: &str, dim: usize) -> Result<Arc<dyn VectorStore>, StoreError> {
        Ok(Arc::new(MemoryStore::new(embedder_id, dim)))
    }
}
