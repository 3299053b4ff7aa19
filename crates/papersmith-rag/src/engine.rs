use std::sync::Arc;
use std::time::Duration;

use papersmith_backend::cache::DEFAULT_CACHE_CAPACITY;
use papersmith_backend::{create_embedder, create_generator, CachingEmbedder};
use papersmith_core::chunker::{Chunker, ChunkingConfig};
use papersmith_core::config::{expand_path, RagSettings, Settings, StoreKind};
use papersmith_core::error::{BackendError, StoreError};
use papersmith_core::traits::{Embedder, Generator, StoreFactory, VectorStore};
use papersmith_core::types::{
    Chunk, DocumentFilter, DocumentMetadata, IndexReport, IndexStatus, IndexedVector, RagAnswer, SearchResult,
    SectionLabel, SourceDocument, VectorMetadata,
};
use papersmith_core::{Error, Result};
use papersmith_vector::{LanceStoreFactory, MemoryStoreFactory};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::context::build_context;
use crate::corrective::{exhausted, Attempt, Stage};
use crate::prompts;
use crate::registry::IndexRegistry;

/// Text embedded to learn an embedder's dimension when a rebuild has no
/// documents to index.
const DIMENSION_PROBE: &str = "dimension probe";

/// Reported as the stalled backend when an attempt times out in a search.
const STORE_BACKEND: &str = "vector-store";

/// Retrieval-and-answer core shared by the ingestion, query and admin
/// entry points.
pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    registry: Arc<IndexRegistry>,
    factory: Arc<dyn StoreFactory>,
    chunker: Chunker,
    rag: RagSettings,
    embed_batch_size: usize,
}

impl RagEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        registry: Arc<IndexRegistry>,
        factory: Arc<dyn StoreFactory>,
        settings: &Settings,
    ) -> Self {
        let chunker = Chunker::new(ChunkingConfig { target_chars: settings.chunking.target_chars });
        Self {
            embedder,
            generator,
            registry,
            factory,
            chunker,
            rag: settings.rag.clone(),
            embed_batch_size: settings.chunking.embed_batch_size.max(1),
        }
    }

    /// Build backends and the store factory named by `settings`. The
    /// registry starts empty; install a persisted store with
    /// [`load_index`](Self::load_index) or build one with
    /// [`rebuild_index`](Self::rebuild_index).
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let embedder: Arc<dyn Embedder> =
            Arc::new(CachingEmbedder::new(create_embedder(&settings.backend)?, DEFAULT_CACHE_CAPACITY));
        let generator = create_generator(&settings.backend)?;
        let factory: Arc<dyn StoreFactory> = match settings.store.kind {
            StoreKind::Memory => Arc::new(MemoryStoreFactory),
            StoreKind::Lance => Arc::new(LanceStoreFactory::new(
                expand_path(&settings.store.uri).to_string_lossy().to_string(),
                settings.store.table.clone(),
            )),
        };
        Ok(Self::new(embedder, generator, Arc::new(IndexRegistry::new()), factory, settings))
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.id()
    }

    pub fn default_top_k(&self) -> usize {
        self.rag.top_k
    }

    pub async fn status(&self) -> IndexStatus {
        self.registry.status().await
    }

    /// Serve an existing store, e.g. one reopened from disk at startup.
    pub async fn load_index(&self, store: Arc<dyn VectorStore>) -> Result<()> {
        self.check_binding(store.as_ref())?;
        self.registry.set(store).await;
        Ok(())
    }

    /// Chunk, embed and store one document. The document's previous vectors
    /// stay visible until the new set replaces them in one step. A rebuild
    /// requested meanwhile starts after this write and does not keep it.
    pub async fn index_document(&self, text: &str, metadata: &DocumentMetadata) -> Result<IndexReport> {
        let writer = self.registry.writer().await?;
        self.check_binding(writer.store())?;
        self.write_document(writer.store(), text, metadata).await
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<usize> {
        let writer = self.registry.writer().await?;
        let removed = writer.store().remove(document_id).await?;
        info!(document_id, removed, "removed document");
        Ok(removed)
    }

    /// Build a fresh store holding exactly `documents` and swap it in. Queries
    /// see `IndexNotReady` until the swap; on any failure the previous index
    /// is served again.
    pub async fn rebuild_index(&self, documents: &[SourceDocument]) -> Result<Vec<IndexReport>> {
        let guard = self.registry.begin_rebuild().await;
        info!(documents = documents.len(), embedder_id = self.embedder.id(), "rebuilding index");

        let mut store: Option<Arc<dyn VectorStore>> = None;
        let mut reports = Vec::with_capacity(documents.len());
        for doc in documents {
            let (chunks, vectors) = self.embed_document(&doc.text, &doc.metadata).await?;
            let target = match &store {
                Some(s) => s.clone(),
                None => {
                    let dim = vectors.first().map_or(0, |v| v.embedding.len());
                    let created = self.factory.create(self.embedder.id(), dim).await?;
                    store = Some(created.clone());
                    created
                }
            };
            reports.push(self.commit_document(target.as_ref(), &doc.metadata.document_id, &chunks, vectors).await?);
        }

        let store = match store {
            Some(s) => s,
            None => {
                let dim = self.embedder.embed(DIMENSION_PROBE).await?.len();
                self.factory.create(self.embedder.id(), dim).await?
            }
        };
        guard.commit(store).await?;
        info!(documents = reports.len(), "index rebuilt");
        Ok(reports)
    }

    /// Plain semantic search without generation.
    pub async fn retrieve(
        &self,
        question: &str,
        filter: Option<&DocumentFilter>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let (store, filter) = self.prepare_query(question, filter, top_k).await?;
        let embedding = self.embedder.embed(question).await?;
        Ok(store.search(&embedding, filter, top_k).await?)
    }

    /// Answer `question` from the indexed papers, retrying once with a
    /// hypothetical-abstract query when the first answer is poorly supported.
    pub async fn answer_question(
        &self,
        question: &str,
        filter: Option<&DocumentFilter>,
        top_k: usize,
    ) -> Result<RagAnswer> {
        let (store, filter) = self.prepare_query(question, filter, top_k).await?;
        let threshold = self.rag.support_threshold;
        info!(
            question = %question.chars().take(50).collect::<String>(),
            filter = filter.map_or(0, DocumentFilter::len),
            top_k,
            "answering question"
        );

        let in_flight = Mutex::new(self.embedder.id());
        let baseline = self
            .timed(&in_flight, self.attempt(&in_flight, store.as_ref(), Stage::Baseline, question, filter, top_k))
            .await?;
        let Some(next) = Stage::Baseline.after(&baseline, threshold) else {
            info!(score = baseline.score, attempts = 1, "answer accepted");
            return Ok(baseline.accept());
        };
        debug!(stage = %next, score = baseline.score, threshold, "baseline below threshold");

        let reformulated =
            self.timed(&in_flight, self.attempt(&in_flight, store.as_ref(), next, question, filter, top_k)).await?;
        match next.after(&reformulated, threshold) {
            None => {
                info!(score = reformulated.score, attempts = 2, "answer accepted");
                Ok(reformulated.accept())
            }
            Some(stage) => {
                warn!(%stage, baseline = baseline.score, reformulated = reformulated.score, "corrective retrieval exhausted");
                Ok(exhausted(baseline, reformulated, prompts::insufficient_evidence(self.rag.language)))
            }
        }
    }

    async fn prepare_query<'f>(
        &self,
        question: &str,
        filter: Option<&'f DocumentFilter>,
        top_k: usize,
    ) -> Result<(Arc<dyn VectorStore>, Option<&'f DocumentFilter>)> {
        if question.trim().is_empty() {
            return Err(Error::InvalidRequest("question must not be blank".to_string()));
        }
        if top_k == 0 {
            return Err(Error::InvalidRequest("top_k must be at least 1".to_string()));
        }
        let store = self.registry.get()?;
        self.check_binding(store.as_ref())?;
        let filter = DocumentFilter::normalize(filter);
        if let Some(f) = filter {
            if !store.contains_any(f).await? {
                return Err(Error::EmptyScope { requested: f.len() });
            }
        }
        Ok((store, filter))
    }

    /// Bound one attempt by `rag.attempt_timeout_secs`. A timeout names the
    /// backend the attempt was waiting on.
    async fn timed<F>(&self, in_flight: &Mutex<&str>, attempt: F) -> Result<Attempt>
    where
        F: std::future::Future<Output = Result<Attempt>>,
    {
        let limit: Duration = self.rag.attempt_timeout();
        match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                let backend = *in_flight.lock();
                warn!(backend, ?limit, "attempt timed out");
                Err(Error::Backend(BackendError::timeout(backend, limit)))
            }
        }
    }

    async fn attempt<'a>(
        &'a self,
        in_flight: &Mutex<&'a str>,
        store: &dyn VectorStore,
        stage: Stage,
        question: &str,
        filter: Option<&DocumentFilter>,
        top_k: usize,
    ) -> Result<Attempt> {
        let language = self.rag.language;
        let query_text = match stage {
            Stage::Baseline => question.to_string(),
            Stage::Reformulated | Stage::Exhausted => {
                let prompt = prompts::hypothetical_abstract_prompt(language, question);
                *in_flight.lock() = self.generator.id();
                let draft = self.generator.generate(&prompt, self.rag.max_answer_tokens).await?;
                if draft.trim().is_empty() {
                    warn!("empty hypothetical abstract; searching with the question");
                    question.to_string()
                } else {
                    draft
                }
            }
        };

        *in_flight.lock() = self.embedder.id();
        let embedding = self.embedder.embed(&query_text).await?;
        *in_flight.lock() = STORE_BACKEND;
        let sources = store.search(&embedding, filter, top_k).await?;
        if sources.is_empty() {
            debug!(%stage, "no search results; skipping generation");
            return Ok(Attempt::empty(stage));
        }

        let context = build_context(&sources, language, self.rag.max_context_chars);
        *in_flight.lock() = self.generator.id();
        let answer = self
            .generator
            .generate(&prompts::answer_prompt(language, question, &context), self.rag.max_answer_tokens)
            .await?;
        let raw_score = self
            .generator
            .generate(&prompts::support_prompt(language, question, &context, &answer), 16)
            .await?;
        let score = prompts::parse_support_score(&raw_score);
        debug!(%stage, results = sources.len(), context_chars = context.len(), score, "attempt scored");
        Ok(Attempt { stage, answer: Some(answer), sources, score })
    }

    fn check_binding(&self, store: &dyn VectorStore) -> Result<()> {
        if store.embedder_id() != self.embedder.id() {
            return Err(StoreError::ModelMismatch {
                expected: store.embedder_id().to_string(),
                actual: self.embedder.id().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn write_document(
        &self,
        store: &dyn VectorStore,
        text: &str,
        metadata: &DocumentMetadata,
    ) -> Result<IndexReport> {
        let (chunks, vectors) = self.embed_document(text, metadata).await?;
        self.commit_document(store, &metadata.document_id, &chunks, vectors).await
    }

    async fn commit_document(
        &self,
        store: &dyn VectorStore,
        document_id: &str,
        chunks: &[Chunk],
        vectors: Vec<IndexedVector>,
    ) -> Result<IndexReport> {
        store.replace_document(document_id, vectors).await.map_err(|e| indexing(document_id, e))?;
        let mut sections: Vec<SectionLabel> = Vec::new();
        for chunk in chunks {
            if !sections.contains(&chunk.section_label) {
                sections.push(chunk.section_label);
            }
        }
        info!(document_id, chunks = chunks.len(), "indexed document");
        Ok(IndexReport { document_id: document_id.to_string(), chunk_count: chunks.len(), sections })
    }

    /// Chunk and embed without touching any store.
    async fn embed_document(
        &self,
        text: &str,
        metadata: &DocumentMetadata,
    ) -> Result<(Vec<Chunk>, Vec<IndexedVector>)> {
        let document_id = metadata.document_id.as_str();
        if document_id.trim().is_empty() {
            return Err(Error::InvalidRequest("document_id must not be blank".to_string()));
        }
        let chunks = self.chunker.chunk_document(document_id, text);
        if chunks.is_empty() {
            return Err(indexing(document_id, "document has no indexable text"));
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await.map_err(|e| indexing(document_id, e))?;
            if vectors.len() != texts.len() {
                return Err(indexing(
                    document_id,
                    format!("embedder returned {} vectors for {} chunks", vectors.len(), texts.len()),
                ));
            }
            embeddings.extend(vectors);
        }
        debug!(document_id, chunks = chunks.len(), "embedded document");

        let vectors = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedVector {
                chunk_id: chunk.id.clone(),
                embedder_id: self.embedder.id().to_string(),
                embedding,
                text: chunk.text.clone(),
                metadata: VectorMetadata::for_chunk(metadata, chunk),
            })
            .collect();
        Ok((chunks, vectors))
    }
}

fn indexing(document_id: &str, reason: impl ToString) -> Error {
    Error::Indexing { document_id: document_id.to_string(), reason: reason.to_string() }
}
