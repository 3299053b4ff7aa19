use std::fs;
use tempfile::TempDir;

use papersmith_core::chunker::{clean_text, Chunker, ChunkingConfig};
use papersmith_core::config::{Config, Language, StoreKind};
use papersmith_core::types::{Chunk, DocumentMetadata, RagAnswer, SectionLabel, VectorMetadata};

const PAPER: &str = "Learning Rates in Practice\nA. Author, B. Author\n\n\
Abstract\n\
We revisit gradient descent. The step size controls convergence.\n\n\
1. Introduction\n\
Gradient descent minimizes a differentiable loss by following the negative gradient. \
It is the workhorse of modern machine learning.\n\n\
2 Methods\n\
We sweep the learning rate over five orders of magnitude. Each run uses the same seed.\n\n\
3 Results\n\
Large steps diverge. Small steps converge slowly!\n\n\
References\n\
[1] Cauchy, 1847.";

#[test]
fn chunk_document_labels_every_section_in_order() {
    let chunker = Chunker::new(ChunkingConfig { target_chars: 60 });
    let chunks = chunker.chunk_document("lr-paper", PAPER);

    let mut labels: Vec<SectionLabel> = chunks.iter().map(|c| c.section_label).collect();
    labels.dedup();
    assert_eq!(
        labels,
        vec![
            SectionLabel::Unclassified,
            SectionLabel::Abstract,
            SectionLabel::Introduction,
            SectionLabel::Methods,
            SectionLabel::Results,
            SectionLabel::References,
        ]
    );
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.sequence_index, i);
        assert_eq!(chunk.document_id, "lr-paper");
        assert!(!chunk.text.contains("Introduction"), "heading lines are not chunk text");
    }
}

#[test]
fn chunks_of_each_span_rebuild_the_cleaned_span() {
    let chunker = Chunker::new(ChunkingConfig { target_chars: 50 });
    let chunks = chunker.chunk_document("lr-paper", PAPER);
    for span in chunker.sections(PAPER) {
        let joined = chunks
            .iter()
            .filter(|c| c.section_label == span.label)
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(joined, clean_text(&span.text), "span {}", span.label);
    }
}

#[test]
fn blank_text_yields_no_chunks() {
    let chunker = Chunker::default();
    assert!(chunker.chunk_document("empty", "  \n\t \n").is_empty());
}

#[test]
fn vector_metadata_copies_document_and_chunk_fields() {
    let doc = DocumentMetadata::new("p1", "On Descent").with_authors(["Ada", "Grace"]).with_year(2021);
    let chunk = Chunk {
        id: Chunk::make_id("p1", 3),
        document_id: "p1".to_string(),
        text: "x".to_string(),
        section_label: SectionLabel::Methods,
        sequence_index: 3,
    };
    let meta = VectorMetadata::for_chunk(&doc, &chunk);
    assert_eq!(meta.title, "On Descent");
    assert_eq!(meta.authors, vec!["Ada".to_string(), "Grace".to_string()]);
    assert_eq!(meta.year, Some(2021));
    assert_eq!(meta.section_label, SectionLabel::Methods);
    assert_eq!(chunk.id, "p1:00003");
}

#[test]
fn rag_answer_serializes_with_lowercase_labels() {
    let answer = RagAnswer {
        answer_text: "ok".to_string(),
        sources: Vec::new(),
        support_score: 0.5,
        attempts: 2,
        degraded: true,
    };
    let json = serde_json::to_value(&answer).unwrap();
    assert_eq!(json["attempts"], 2);
    assert_eq!(json["degraded"], true);
    assert_eq!(serde_json::to_value(SectionLabel::Unclassified).unwrap(), "unclassified");
}

#[test]
fn config_toml_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        r#"
[backend]
embedding = "local-cpu"
generation = "openai"

[rag]
support_threshold = 0.75
top_k = 8
language = "ja"

[store]
kind = "memory"
"#,
    )
    .unwrap();

    let settings = Config::load_from(tmp.path()).unwrap().settings().unwrap();
    assert_eq!(settings.backend.embedding, "local-cpu");
    assert_eq!(settings.backend.generation, "openai");
    assert!((settings.rag.support_threshold - 0.75).abs() < 1e-6);
    assert_eq!(settings.rag.top_k, 8);
    assert_eq!(settings.rag.language, Language::Ja);
    assert_eq!(settings.store.kind, StoreKind::Memory);
    // untouched keys keep their defaults
    assert_eq!(settings.chunking.embed_batch_size, 32);
    assert_eq!(settings.rag.max_context_chars, 8000);
}

#[test]
fn invalid_threshold_in_file_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "[rag]\nsupport_threshold = 3.0\n").unwrap();
    let err = Config::load_from(tmp.path()).unwrap().settings().unwrap_err();
    assert!(err.to_string().contains("support_threshold"));
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let tmp = TempDir::new().unwrap();
    let settings = Config::load_from(tmp.path()).unwrap().settings().unwrap();
    assert_eq!(settings.rag.top_k, 5);
    assert_eq!(settings.store.table, "paper_chunks");
}
