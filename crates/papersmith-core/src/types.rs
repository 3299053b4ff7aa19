//! Domain types shared by the chunker, the backends, the vector stores and
//! the retrieval orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub type ChunkId = String;
pub type DocumentId = String;

/// Structural role of a span of paper text, assigned heuristically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionLabel {
    Abstract,
    Introduction,
    Methods,
    Results,
    Discussion,
    Conclusion,
    References,
    Unclassified,
}

impl SectionLabel {
    pub const ALL: [SectionLabel; 8] = [
        SectionLabel::Abstract,
        SectionLabel::Introduction,
        SectionLabel::Methods,
        SectionLabel::Results,
        SectionLabel::Discussion,
        SectionLabel::Conclusion,
        SectionLabel::References,
        SectionLabel::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionLabel::Abstract => "abstract",
            SectionLabel::Introduction => "introduction",
            SectionLabel::Methods => "methods",
            SectionLabel::Results => "results",
            SectionLabel::Discussion => "discussion",
            SectionLabel::Conclusion => "conclusion",
            SectionLabel::References => "references",
            SectionLabel::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| format!("unknown section label '{}'", s))
    }
}

/// Bibliographic metadata handed over by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

impl DocumentMetadata {
    pub fn new(document_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), title: title.into(), authors: Vec::new(), year: None }
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }
}

/// A bounded span of a document's text; the atomic retrieval unit.
///
/// - `id`: `"{document_id}:{sequence_index:05}"`, so ascending ids follow
///   document order
/// - `section_label`: structural role of the span the chunk was cut from
/// - `sequence_index`: position within the parent document, strictly increasing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub section_label: SectionLabel,
    pub sequence_index: usize,
}

impl Chunk {
    pub fn make_id(document_id: &str, sequence_index: usize) -> ChunkId {
        format!("{}:{:05}", document_id, sequence_index)
    }
}

/// Metadata stored next to every vector and echoed back in search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub document_id: DocumentId,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub section_label: SectionLabel,
}

impl VectorMetadata {
    pub fn for_chunk(document: &DocumentMetadata, chunk: &Chunk) -> Self {
        Self {
            document_id: document.document_id.clone(),
            title: document.title.clone(),
            authors: document.authors.clone(),
            year: document.year,
            section_label: chunk.section_label,
        }
    }
}

/// A stored chunk embedding. `embedder_id` names the backend/model that
/// produced `embedding`; stores refuse to mix embedders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub chunk_id: ChunkId,
    pub embedder_id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: VectorMetadata,
}

/// One retrieved chunk. `score` is cosine similarity clamped to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub text: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// The answer returned to the query collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer_text: String,
    pub sources: Vec<SearchResult>,
    pub support_score: f32,
    /// Corrective-retrieval cycles used: always 1 or 2.
    pub attempts: u8,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Empty,
    Building,
    Ready,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexState::Empty => "empty",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Health snapshot of the index registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub state: IndexState,
    pub chunk_count: usize,
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub document_id: DocumentId,
    pub chunk_count: usize,
    pub sections: Vec<SectionLabel>,
}

/// A document as handed to a full index rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Exact-match set of document ids restricting a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    ids: BTreeSet<DocumentId>,
}

impl DocumentFilter {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { ids: ids.into_iter().map(Into::into).collect() }
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.ids.contains(document_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// An empty filter means "no restriction".
    pub fn normalize(filter: Option<&DocumentFilter>) -> Option<&DocumentFilter> {
        filter.filter(|f| !f.is_empty())
    }
}

impl<S: Into<String>> FromIterator<S> for DocumentFilter {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_sort_in_sequence_order() {
        let mut ids: Vec<String> = [10usize, 2, 1, 100].iter().map(|i| Chunk::make_id("paper", *i)).collect();
        ids.sort();
        assert_eq!(ids, vec!["paper:00001", "paper:00002", "paper:00010", "paper:00100"]);
    }

    #[test]
    fn section_label_round_trips_through_str() {
        for label in SectionLabel::ALL {
            assert_eq!(label.as_str().parse::<SectionLabel>().unwrap(), label);
        }
        assert!("appendix".parse::<SectionLabel>().is_err());
    }

    #[test]
    fn empty_filter_normalizes_to_none() {
        let empty = DocumentFilter::default();
        assert!(DocumentFilter::normalize(Some(&empty)).is_none());
        let one = DocumentFilter::new(["a"]);
        assert!(DocumentFilter::normalize(Some(&one)).is_some());
    }
}
