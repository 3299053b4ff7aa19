//! Structure-aware chunking of extracted paper text.
//!
//! Text is first split into section spans by a [`SectionClassifier`], then
//! each span is cut into chunks on sentence boundaries.
use tracing::debug;

use crate::types::{Chunk, SectionLabel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    pub label: SectionLabel,
    pub text: String,
}

/// Splits document text into ordered, labeled spans. Text that cannot be
/// classified must come back as [`SectionLabel::Unclassified`], never dropped.
pub trait SectionClassifier: Send + Sync {
    fn split(&self, text: &str) -> Vec<SectionSpan>;
}

/// Heading keywords per label, checked in order.
const HEADING_MARKERS: &[(SectionLabel, &[&str])] = &[
    (SectionLabel::Abstract, &["abstract", "要旨", "概要"]),
    (SectionLabel::Introduction, &["introduction", "はじめに", "序論"]),
    (
        SectionLabel::Methods,
        &["method", "methods", "methodology", "approach", "proposed method", "materials and methods", "手法", "提案手法", "方法論"],
    ),
    (
        SectionLabel::Results,
        &["result", "results", "experiment", "experiments", "evaluation", "experimental results", "結果", "実験", "評価"],
    ),
    (SectionLabel::Discussion, &["discussion", "考察", "議論"]),
    (
        SectionLabel::Conclusion,
        &["conclusion", "conclusions", "summary", "concluding remarks", "結論", "まとめ"],
    ),
    (SectionLabel::References, &["references", "bibliography", "参考文献", "文献"]),
];

const MAX_HEADING_WORDS: usize = 8;

/// Keyword/heading based classifier over [`HEADING_MARKERS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadingClassifier;

impl HeadingClassifier {
    /// Label of `line` if it reads as a known section heading.
    pub fn classify_heading(line: &str) -> Option<SectionLabel> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.split_whitespace().count() > MAX_HEADING_WORDS {
            return None;
        }
        let normalized = strip_numbering(trimmed).trim_end_matches([':', '：', '.']).trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        HEADING_MARKERS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| *k == normalized))
            .map(|(label, _)| *label)
    }
}

/// Drop leading section numbering such as `2`, `2.1.`, `IV.` or `3)`.
fn strip_numbering(line: &str) -> &str {
    let mut parts = line.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();
    let token = first.trim_end_matches(['.', ')']);
    let is_arabic = !token.is_empty() && token.chars().all(|c| c.is_ascii_digit() || c == '.');
    let is_roman = !token.is_empty()
        && first.ends_with('.')
        && token.chars().all(|c| matches!(c, 'I' | 'V' | 'X' | 'L'));
    if (is_arabic || is_roman) && !rest.trim().is_empty() {
        rest.trim_start()
    } else {
        line
    }
}

impl SectionClassifier for HeadingClassifier {
    fn split(&self, text: &str) -> Vec<SectionSpan> {
        let mut spans = Vec::new();
        let mut label = SectionLabel::Unclassified;
        let mut body: Vec<&str> = Vec::new();
        for line in text.lines() {
            if let Some(next) = Self::classify_heading(line) {
                push_span(&mut spans, label, &body);
                body.clear();
                label = next;
            } else {
                body.push(line);
            }
        }
        push_span(&mut spans, label, &body);
        debug!(spans = spans.len(), "split text into section spans");
        spans
    }
}

fn push_span(spans: &mut Vec<SectionSpan>, label: SectionLabel, body: &[&str]) {
    let text = body.join("\n");
    if !text.trim().is_empty() {
        spans.push(SectionSpan { label, text });
    }
}

/// Collapse whitespace runs to single spaces; the canonical form chunks are
/// reconstructed against.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_cjk_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

/// Byte offsets just past each sentence terminator: `.`, `!`, `?` followed by
/// a space, or a CJK terminator anywhere.
fn sentence_ends(cleaned: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut chars = cleaned.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match chars.peek() {
            Some((_, next)) if matches!(c, '.' | '!' | '?') => *next == ' ',
            Some(_) => is_cjk_terminator(c),
            None => false,
        };
        if boundary {
            ends.push(i + c.len_utf8());
        }
    }
    ends.push(cleaned.len());
    ends
}

/// Split cleaned text into sentences.
pub fn split_sentences(cleaned: &str) -> Vec<&str> {
    let mut start = 0;
    sentence_ends(cleaned)
        .into_iter()
        .filter_map(|end| {
            let sentence = cleaned[start..end].trim();
            start = end;
            (!sentence.is_empty()).then_some(sentence)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target chunk length in characters; a chunk closes once it reaches it.
    pub target_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { target_chars: 512 }
    }
}

pub struct Chunker {
    config: ChunkingConfig,
    classifier: Box<dyn SectionClassifier>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config, classifier: Box::new(HeadingClassifier) }
    }

    pub fn with_classifier(config: ChunkingConfig, classifier: Box<dyn SectionClassifier>) -> Self {
        Self { config, classifier }
    }

    pub fn sections(&self, text: &str) -> Vec<SectionSpan> {
        self.classifier.split(text)
    }

    /// Chunk a whole document. `sequence_index` runs across all sections.
    pub fn chunk_document(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for span in self.sections(text) {
            for piece in self.chunk_span(&span.text) {
                let sequence_index = chunks.len();
                chunks.push(Chunk {
                    id: Chunk::make_id(document_id, sequence_index),
                    document_id: document_id.to_string(),
                    text: piece,
                    section_label: span.label,
                    sequence_index,
                });
            }
        }
        debug!(document_id, chunks = chunks.len(), "chunked document");
        chunks
    }

    /// Accumulate whole sentences until the target length is reached or
    /// exceeded. Every chunk is a slice of the cleaned text.
    pub fn chunk_span(&self, text: &str) -> Vec<String> {
        let cleaned = clean_text(text);
        let mut out = Vec::new();
        let mut start = 0;
        for end in sentence_ends(&cleaned) {
            let piece = cleaned[start..end].trim();
            if piece.chars().count() >= self.config.target_chars || end == cleaned.len() {
                if !piece.is_empty() {
                    out.push(piece.to_string());
                }
                start = end;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_are_recognized_with_numbering() {
        assert_eq!(HeadingClassifier::classify_heading("1. Introduction"), Some(SectionLabel::Introduction));
        assert_eq!(HeadingClassifier::classify_heading("  3 Methods  "), Some(SectionLabel::Methods));
        assert_eq!(HeadingClassifier::classify_heading("IV. RESULTS"), Some(SectionLabel::Results));
        assert_eq!(HeadingClassifier::classify_heading("Conclusions:"), Some(SectionLabel::Conclusion));
        assert_eq!(HeadingClassifier::classify_heading("考察"), Some(SectionLabel::Discussion));
        assert_eq!(HeadingClassifier::classify_heading("The introduction of noise hurts."), None);
        assert_eq!(HeadingClassifier::classify_heading("2.1 Related work"), None);
    }

    #[test]
    fn preamble_is_kept_as_unclassified() {
        let text = "Deep Nets for Everything\nJane Doe\n\nAbstract\nWe study nets.\n\n1 Introduction\nNets are big.";
        let spans = HeadingClassifier.split(text);
        let labels: Vec<_> = spans.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec![SectionLabel::Unclassified, SectionLabel::Abstract, SectionLabel::Introduction]);
        assert!(spans[0].text.contains("Jane Doe"));
        assert!(!spans[1].text.contains("Abstract"));
    }

    #[test]
    fn text_without_headings_is_one_unclassified_span() {
        let spans = HeadingClassifier.split("Just a paragraph. Another sentence.");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].label, SectionLabel::Unclassified);
    }

    #[test]
    fn sentences_split_on_terminators() {
        let s = split_sentences("One. Two? Three! 3.14 is pi. 日本語です。次の文");
        assert_eq!(s, vec!["One.", "Two?", "Three!", "3.14 is pi.", "日本語です。", "次の文"]);
    }

    #[test]
    fn chunks_close_once_target_is_reached() {
        let chunker = Chunker::new(ChunkingConfig { target_chars: 20 });
        let pieces = chunker.chunk_span("Short one. Another short one. Third sentence here. End.");
        assert_eq!(pieces, vec!["Short one. Another short one.", "Third sentence here.", "End."]);
    }

    #[test]
    fn oversized_sentence_is_not_split() {
        let chunker = Chunker::new(ChunkingConfig { target_chars: 10 });
        let long = "This single sentence is far longer than the target size allows.";
        assert_eq!(chunker.chunk_span(long), vec![long.to_string()]);
    }

    #[test]
    fn chunks_reconstruct_cleaned_section_text() {
        let chunker = Chunker::new(ChunkingConfig { target_chars: 40 });
        let text = "Gradient descent   minimizes loss.\nIt follows the negative gradient!  Step sizes matter?\n\
                    Too large diverges. Too small crawls. 学習率は重要です。Momentum helps.";
        let pieces = chunker.chunk_span(text);
        assert!(pieces.len() > 1);
        let cleaned = clean_text(text);
        let mut rebuilt = String::new();
        for piece in &pieces {
            if !rebuilt.is_empty() && !rebuilt.ends_with('。') {
                rebuilt.push(' ');
            }
            rebuilt.push_str(piece);
        }
        assert_eq!(rebuilt, cleaned);
    }

    #[test]
    fn ascii_chunks_join_with_single_spaces() {
        let chunker = Chunker::new(ChunkingConfig { target_chars: 25 });
        let text = "Alpha beta gamma.  Delta\tepsilon zeta!\nEta theta? Iota kappa lambda. Mu.";
        let pieces = chunker.chunk_span(text);
        assert_eq!(pieces.join(" "), clean_text(text));
    }

    #[test]
    fn sequence_index_is_monotonic_across_sections() {
        let chunker = Chunker::new(ChunkingConfig { target_chars: 10 });
        let text = "Abstract\nFirst point here. Second point here.\nMethods\nWe did things. Then more things.";
        let chunks = chunker.chunk_document("doc", text);
        assert_eq!(chunks.len(), 4);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.sequence_index, i);
            assert_eq!(c.id, Chunk::make_id("doc", i));
        }
        assert_eq!(chunks[0].section_label, SectionLabel::Abstract);
        assert_eq!(chunks[3].section_label, SectionLabel::Methods);
    }
}
