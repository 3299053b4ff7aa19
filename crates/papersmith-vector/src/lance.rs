//! LanceDB-backed [`VectorStore`].
//!
//! Each store is one chunk table. A `<base>_meta` key/value table records
//! the embedder binding of every table and which table is active, so a
//! process start can reopen the last committed index.
use std::collections::BTreeSet;
use std::sync::Arc;

use arrow_array::{RecordBatchIterator, RecordBatchReader};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use papersmith_core::error::StoreError;
use papersmith_core::traits::{validate_vectors, StoreFactory, VectorStore};
use papersmith_core::types::{DocumentFilter, DocumentId, IndexedVector, SearchResult};
use tracing::{debug, info};

use crate::{cut_is_settled, rank};
use crate::schema::{build_chunk_schema, vector_dim};
use crate::table::{
    batch_to_scored, chunk_predicate, document_predicate, ensure_table, filter_predicate, get_meta, op_err, open_db,
    set_meta, string_column, table_exists, vectors_to_batch,
};

/// Extra candidates fetched beyond `top_k`. The fetch doubles until the
/// score at the cut is strictly above the lowest candidate, so every row tied
/// at the cut takes part in the chunk-id ordering.
const CANDIDATE_SLACK: usize = 8;
const ACTIVE_KEY: &str = "active_table";

fn meta_table(base: &str) -> String {
    format!("{}_meta", base)
}

fn dim_to_i32(dim: usize) -> Result<i32, StoreError> {
    i32::try_from(dim).map_err(|_| StoreError::Operation(format!("vector dimension {} is too large", dim)))
}

pub struct LanceStore {
    conn: Connection,
    table: Table,
    base: String,
    name: String,
    embedder_id: String,
    dim: usize,
}

impl LanceStore {
    async fn create(conn: Connection, base: &str, name: &str, embedder_id: &str, dim: usize) -> Result<Self, StoreError> {
        ensure_table(&conn, name, build_chunk_schema(dim_to_i32(dim)?)).await?;
        let meta = meta_table(base);
        set_meta(&conn, &meta, &format!("{}.embedder_id", name), embedder_id).await?;
        set_meta(&conn, &meta, &format!("{}.dim", name), &dim.to_string()).await?;
        let table = conn.open_table(name).execute().await.map_err(op_err)?;
        info!(table = name, embedder_id, dim, "created chunk table");
        Ok(Self { conn, table, base: base.to_string(), name: name.to_string(), embedder_id: embedder_id.to_string(), dim })
    }

    /// Reopen the table last committed under `base`, if any.
    pub async fn open_active(uri: &str, base: &str) -> Result<Option<Self>, StoreError> {
        let conn = open_db(uri).await?;
        let meta = meta_table(base);
        let Some(name) = get_meta(&conn, &meta, ACTIVE_KEY).await? else {
            return Ok(None);
        };
        let embedder_id = get_meta(&conn, &meta, &format!("{}.embedder_id", name))
            .await?
            .ok_or_else(|| StoreError::Operation(format!("table '{}' has no recorded embedder", name)))?;
        let table = conn.open_table(&name).execute().await.map_err(op_err)?;
        let schema = table.schema().await.map_err(op_err)?;
        let dim = vector_dim(&schema)
            .ok_or_else(|| StoreError::Operation(format!("table '{}' has no vector column", name)))?;

        // Rows carry their own embedder id; a table written by another model is refused.
        let mut probe = table
            .query()
            .select(Select::columns(&["embedder_id"]))
            .limit(1)
            .execute()
            .await
            .map_err(op_err)?;
        if let Some(batch) = probe.try_next().await.map_err(op_err)? {
            if batch.num_rows() > 0 {
                let stored = string_column(&batch, "embedder_id")?.value(0);
                if stored != embedder_id {
                    return Err(StoreError::ModelMismatch { expected: embedder_id, actual: stored.to_string() });
                }
            }
        }
        info!(table = %name, %embedder_id, dim, "opened active chunk table");
        Ok(Some(Self { conn, table, base: base.to_string(), name, embedder_id, dim }))
    }

    /// Open the active table, checking it is bound to `embedder_id`/`dim`,
    /// or create and activate an empty one named `base`.
    pub async fn open_or_create(uri: &str, base: &str, embedder_id: &str, dim: usize) -> Result<Self, StoreError> {
        if let Some(store) = Self::open_active(uri, base).await? {
            if store.embedder_id != embedder_id {
                return Err(StoreError::ModelMismatch { expected: store.embedder_id, actual: embedder_id.to_string() });
            }
            if store.dim != dim {
                return Err(StoreError::DimensionMismatch { expected: store.dim, actual: dim });
            }
            return Ok(store);
        }
        let conn = open_db(uri).await?;
        let store = Self::create(conn, base, base, embedder_id, dim).await?;
        store.commit().await?;
        Ok(store)
    }

    /// Up to `limit` nearest rows by cosine distance, prefiltered.
    async fn candidates(
        &self,
        query_embedding: &[f32],
        filter: Option<&DocumentFilter>,
        limit: usize,
    ) -> Result<Vec<(f32, SearchResult)>, StoreError> {
        let mut query = self
            .table
            .vector_search(query_embedding.to_vec())
            .map_err(op_err)?
            .distance_type(DistanceType::Cosine)
            .limit(limit);
        if let Some(f) = DocumentFilter::normalize(filter) {
            query = query.only_if(filter_predicate(f));
        }
        let mut stream = query.execute().await.map_err(op_err)?;
        let mut scored = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(op_err)? {
            scored.extend(batch_to_scored(&batch)?);
        }
        Ok(scored)
    }

    fn reader(&self, vectors: &[IndexedVector]) -> Result<Box<dyn RecordBatchReader + Send>, StoreError> {
        let dim = dim_to_i32(self.dim)?;
        let batch = vectors_to_batch(vectors, dim)?;
        Ok(Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), build_chunk_schema(dim))))
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn add(&self, vectors: Vec<IndexedVector>) -> Result<(), StoreError> {
        validate_vectors(&self.embedder_id, self.dim, None, &vectors)?;
        if vectors.is_empty() {
            return Ok(());
        }
        let predicate = chunk_predicate(vectors.iter().map(|v| v.chunk_id.as_str()));
        if self.table.count_rows(Some(predicate.clone())).await.map_err(op_err)? > 0 {
            let mut stream = self
                .table
                .query()
                .only_if(predicate)
                .select(Select::columns(&["chunk_id"]))
                .limit(1)
                .execute()
                .await
                .map_err(op_err)?;
            let existing = match stream.try_next().await.map_err(op_err)? {
                Some(batch) if batch.num_rows() > 0 => string_column(&batch, "chunk_id")?.value(0).to_string(),
                _ => vectors[0].chunk_id.clone(),
            };
            return Err(StoreError::DuplicateChunk(existing));
        }
        self.table.add(self.reader(&vectors)?).execute().await.map_err(op_err)?;
        debug!(table = %self.name, rows = vectors.len(), "appended vectors");
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, vectors: Vec<IndexedVector>) -> Result<(), StoreError> {
        validate_vectors(&self.embedder_id, self.dim, Some(document_id), &vectors)?;
        let predicate = document_predicate(document_id);
        if vectors.is_empty() {
            self.table.delete(&predicate).await.map_err(op_err)?;
            return Ok(());
        }
        // One commit: upsert the new rows and drop the document's rows that
        // are not part of the new set.
        let mut mi = self.table.merge_insert(&["chunk_id"]);
        mi.when_matched_update_all(None)
            .when_not_matched_insert_all()
            .when_not_matched_by_source_delete(Some(predicate));
        mi.execute(self.reader(&vectors)?).await.map_err(op_err)?;
        debug!(table = %self.name, document_id, rows = vectors.len(), "replaced document vectors");
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
        if top_k == 0 || self.table.count_rows(None).await.map_err(op_err)? == 0 {
            return Ok(Vec::new());
        }
        let mut limit = top_k + CANDIDATE_SLACK;
        loop {
            let scored = self.candidates(query_embedding, filter, limit).await?;
            if scored.len() < limit || cut_is_settled(&scored, top_k) {
                return Ok(rank(scored, top_k));
            }
            debug!(table = %self.name, limit, "equal scores straddle the top-k cut; widening");
            limit = limit.saturating_mul(2);
        }
    }

    async fn remove(&self, document_id: &str) -> Result<usize, StoreError> {
        let predicate = document_predicate(document_id);
        let removed = self.table.count_rows(Some(predicate.clone())).await.map_err(op_err)?;
        if removed > 0 {
            self.table.delete(&predicate).await.map_err(op_err)?;
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.table.count_rows(None).await.map_err(op_err)
    }

    async fn contains_any(&self, filter: &DocumentFilter) -> Result<bool, StoreError> {
        let predicate = (!filter.is_empty()).then(|| filter_predicate(filter));
        Ok(self.table.count_rows(predicate).await.map_err(op_err)? > 0)
    }

    async fn document_ids(&self) -> Result<BTreeSet<DocumentId>, StoreError> {
        let mut stream = self
            .table
            .query()
            .select(Select::columns(&["document_id"]))
            .execute()
            .await
            .map_err(op_err)?;
        let mut ids = BTreeSet::new();
        while let Some(batch) = stream.try_next().await.map_err(op_err)? {
            let col = string_column(&batch, "document_id")?;
            for i in 0..batch.num_rows() {
                ids.insert(col.value(i).to_string());
            }
        }
        Ok(ids)
    }

    async fn commit(&self) -> Result<(), StoreError> {
        set_meta(&self.conn, &meta_table(&self.base), ACTIVE_KEY, &self.name).await?;
        info!(table = %self.name, "activated chunk table");
        Ok(())
    }
}

/// Creates a fresh timestamped table in the same database per rebuild.
#[derive(Debug, Clone)]
pub struct LanceStoreFactory {
    uri: String,
    base: String,
}

impl LanceStoreFactory {
    pub fn new(uri: impl Into<String>, base: impl Into<String>) -> Self {
        Self { uri: uri.into(), base: base.into() }
    }
}

#[async_trait]
impl StoreFactory for LanceStoreFactory {
    async fn create(&self, embedder_id: &str, dim: usize) -> Result<Arc<dyn VectorStore>, StoreError> {
        let conn = open_db(&self.uri).await?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let mut name = format!("{}_{}", self.base, stamp);
        let mut suffix = 1;
        while table_exists(&conn, &name).await? {
            name = format!("{}_{}_{}", self.base, stamp, suffix);
            suffix += 1;
        }
        let store = LanceStore::create(conn, &self.base, &name, embedder_id, dim).await?;
        Ok(Arc::new(store))
    }
}
