//! LanceDB connection and housekeeping helpers.
//!
//! Provides the database open function, an ensure-table helper, row
//! conversion for chunk tables, and a key/value metadata table used to store
//! table bindings and the active table pointer.
use std::fmt::Display;
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMillisecondArray,
};
use arrow_schema::Schema;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use papersmith_core::error::StoreError;
use papersmith_core::types::{DocumentFilter, IndexedVector, SearchResult, VectorMetadata};

use crate::schema::{build_chunk_schema, build_meta_schema, AUTHOR_SEPARATOR};

pub(crate) fn op_err(e: impl Display) -> StoreError {
    StoreError::Operation(e.to_string())
}

pub async fn open_db(uri: &str) -> Result<Connection, StoreError> {
    connect(uri).execute().await.map_err(op_err)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let names = conn.table_names().execute().await.map_err(op_err)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<(), StoreError> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
    conn.create_table(name, Box::new(iter)).execute().await.map_err(op_err)?;
    Ok(())
}

/// SQL string literal with quotes escaped.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn document_predicate(document_id: &str) -> String {
    format!("document_id = {}", quote(document_id))
}

pub fn filter_predicate(filter: &DocumentFilter) -> String {
    let ids: Vec<String> = filter.iter().map(quote).collect();
    format!("document_id IN ({})", ids.join(", "))
}

pub fn chunk_predicate<'a>(chunk_ids: impl Iterator<Item = &'a str>) -> String {
    let ids: Vec<String> = chunk_ids.map(quote).collect();
    format!("chunk_id IN ({})", ids.join(", "))
}

pub fn vectors_to_batch(vectors: &[IndexedVector], dim: i32) -> Result<RecordBatch, StoreError> {
    let now = Utc::now().timestamp_millis();
    let mut chunk_ids = Vec::with_capacity(vectors.len());
    let mut document_ids = Vec::with_capacity(vectors.len());
    let mut embedder_ids = Vec::with_capacity(vectors.len());
    let mut titles = Vec::with_capacity(vectors.len());
    let mut authors = Vec::with_capacity(vectors.len());
    let mut years = Vec::with_capacity(vectors.len());
    let mut labels = Vec::with_capacity(vectors.len());
    let mut texts = Vec::with_capacity(vectors.len());
    let mut embeddings: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(vectors.len());
    for v in vectors {
        chunk_ids.push(v.chunk_id.clone());
        document_ids.push(v.metadata.document_id.clone());
        embedder_ids.push(v.embedder_id.clone());
        titles.push(v.metadata.title.clone());
        authors.push(v.metadata.authors.join(AUTHOR_SEPARATOR));
        years.push(v.metadata.year);
        labels.push(v.metadata.section_label.as_str().to_string());
        texts.push(v.text.clone());
        embeddings.push(Some(v.embedding.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(
        build_chunk_schema(dim),
        vec![
            Arc::new(StringArray::from(chunk_ids)),
            Arc::new(StringArray::from(document_ids)),
            Arc::new(StringArray::from(embedder_ids)),
            Arc::new(StringArray::from(titles)),
            Arc::new(StringArray::from(authors)),
            Arc::new(Int32Array::from(years)),
            Arc::new(StringArray::from(labels)),
            Arc::new(StringArray::from(texts)),
            Arc::new(TimestampMillisecondArray::from(vec![now; vectors.len()])),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(embeddings.into_iter(), dim)),
        ],
    )
    .map_err(op_err)
}

pub(crate) fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Operation(format!("missing {} column", name)))
}

/// Convert search output rows into `(raw cosine, result)` pairs.
/// Lance reports cosine distance, so similarity is `1 - _distance`.
pub(crate) fn batch_to_scored(batch: &RecordBatch) -> Result<Vec<(f32, SearchResult)>, StoreError> {
    let chunk_ids = string_column(batch, "chunk_id")?;
    let document_ids = string_column(batch, "document_id")?;
    let titles = string_column(batch, "title")?;
    let authors = string_column(batch, "authors")?;
    let labels = string_column(batch, "section_label")?;
    let texts = string_column(batch, "text")?;
    let years = batch.column_by_name("year").and_then(|c| c.as_any().downcast_ref::<Int32Array>());
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| StoreError::Operation("missing _distance column".to_string()))?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let authors_raw = authors.value(i);
        let metadata = VectorMetadata {
            document_id: document_ids.value(i).to_string(),
            title: titles.value(i).to_string(),
            authors: if authors_raw.is_empty() {
                Vec::new()
            } else {
                authors_raw.split(AUTHOR_SEPARATOR).map(str::to_string).collect()
            },
            year: years.filter(|y| y.is_valid(i)).map(|y| y.value(i)),
            section_label: labels.value(i).parse().map_err(StoreError::Operation)?,
        };
        let result = SearchResult {
            chunk_id: chunk_ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            score: 0.0,
            metadata,
        };
        out.push((1.0 - distances.value(i), result));
    }
    Ok(out)
}

pub async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<(), StoreError> {
    ensure_table(conn, table, build_meta_schema()).await?;
    let t = conn.open_table(table).execute().await.map_err(op_err)?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(op_err)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    // Upsert behavior via merge_insert: key is unique
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(op_err)?;
    Ok(())
}

pub async fn get_meta(conn: &Connection, table: &str, key: &str) -> Result<Option<String>, StoreError> {
    if !table_exists(conn, table).await? {
        return Ok(None);
    }
    let t = conn.open_table(table).execute().await.map_err(op_err)?;
    let mut stream = t
        .query()
        .only_if(format!("key = {}", quote(key)))
        .execute()
        .await
        .map_err(op_err)?;
    while let Some(batch) = stream.try_next().await.map_err(op_err)? {
        if batch.num_rows() == 0 {
            continue;
        }
        let values = string_column(&batch, "value")?;
        return Ok(Some(values.value(0).to_string()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_escaped() {
        assert_eq!(quote("o'neil"), "'o''neil'");
        assert_eq!(document_predicate("a'b"), "document_id = 'a''b'");
        let filter = DocumentFilter::new(["x", "y"]);
        assert_eq!(filter_predicate(&filter), "document_id IN ('x', 'y')");
        assert_eq!(chunk_predicate(["d:00000"].into_iter()), "chunk_id IN ('d:00000')");
    }
}
