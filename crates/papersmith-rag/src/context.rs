use papersmith_core::config::Language;
use papersmith_core::types::SearchResult;

fn header(language: Language, index: usize, result: &SearchResult) -> String {
    let meta = &result.metadata;
    match language {
        Language::En => format!(
            "[Source {}] {} (document: {}, section: {})",
            index, meta.title, meta.document_id, meta.section_label
        ),
        Language::Ja => format!(
            "[文献 {}] {} (文書: {}, セクション: {})",
            index, meta.title, meta.document_id, meta.section_label
        ),
    }
}

/// Render search results as numbered source blocks, best match first, capped
/// at `max_chars` characters. The block that crosses the cap is cut on a char
/// boundary and the rest are dropped.
pub fn build_context(results: &[SearchResult], language: Language, max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for (i, result) in results.iter().enumerate() {
        let separator = if i == 0 { "" } else { "\n" };
        let block = format!("{}{}\n{}\n", separator, header(language, i + 1, result), result.text);
        let len = block.chars().count();
        if used + len <= max_chars {
            out.push_str(&block);
            used += len;
            continue;
        }
        out.extend(block.chars().take(max_chars - used));
        break;
    }
    out
}
