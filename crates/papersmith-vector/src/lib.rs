//! Vector store adapters: an exact in-memory store and a LanceDB-backed one.
pub mod lance;
pub mod memory;
pub mod schema;
pub mod table;

use std::cmp::Ordering;

use papersmith_core::types::SearchResult;

pub use lance::{LanceStore, LanceStoreFactory};
pub use memory::{MemoryStore, MemoryStoreFactory};

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// Order `(raw similarity, result)` pairs best first, ties by ascending chunk
/// id, keep `top_k`, and clamp the reported score to `[0, 1]`.
pub fn rank(mut scored: Vec<(f32, SearchResult)>, top_k: usize) -> Vec<SearchResult> {
    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa).unwrap_or(Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(raw, mut result)| {
            result.score = raw.clamp(0.0, 1.0);
            result
        })
        .collect()
}

/// Whether the `top_k`-th best score is strictly above the lowest candidate,
/// i.e. no row left unfetched can tie with the rows at the cut.
pub(crate) fn cut_is_settled(scored: &[(f32, SearchResult)], top_k: usize) -> bool {
    let mut scores: Vec<f32> = scored.iter().map(|(s, _)| *s).collect();
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    match (scores.get(top_k.saturating_sub(1)), scores.last()) {
        (Some(cut), Some(lowest)) => cut > lowest,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use papersmith_core::types::{SectionLabel, VectorMetadata};

    fn result(id: &str) -> SearchResult {
        SearchResult {
            chunk_id: id.to_string(),
            text: String::new(),
            score: 0.0,
            metadata: VectorMetadata {
                document_id: "d".to_string(),
                title: String::new(),
                authors: Vec::new(),
                year: None,
                section_label: SectionLabel::Unclassified,
            },
        }
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_break_by_chunk_id_and_scores_clamp() {
        let ranked = rank(
            vec![(0.5, result("d:00002")), (0.5, result("d:00001")), (-0.3, result("d:00000")), (0.9, result("d:00003"))],
            3,
        );
        let ids: Vec<_> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["d:00003", "d:00001", "d:00002"]);

        let all = rank(vec![(-0.3, result("d:00000"))], 5);
        assert_eq!(all[0].score, 0.0);
    }

    #[test]
    fn cut_is_settled_only_below_the_last_tie() {
        let tied = vec![(0.9, result("a")), (0.5, result("b")), (0.5, result("c"))];
        assert!(cut_is_settled(&tied, 1));
        assert!(!cut_is_settled(&tied, 2));
        assert!(cut_is_settled(&tied, 5));
        assert!(cut_is_settled(&[], 3));
    }
}
