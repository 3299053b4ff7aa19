//! Prompt templates and support-score parsing.
use papersmith_core::config::Language;
use tracing::warn;

pub fn answer_prompt(language: Language, question: &str, context: &str) -> String {
    match language {
        Language::En => format!(
            "Answer the question using only the paper excerpts below. \
             If the excerpts do not contain the answer, say so.\n\n\
             [Excerpts]\n{}\n[Question]\n{}\n\n[Answer]\n",
            context, question
        ),
        Language::Ja => format!(
            "以下の論文の内容に基づいて、質問に日本語で回答してください。\
             内容に答えが含まれない場合はその旨を述べてください。\n\n\
             【論文の内容】\n{}\n【質問】\n{}\n\n【回答】\n",
            context, question
        ),
    }
}

pub fn support_prompt(language: Language, question: &str, context: &str, answer: &str) -> String {
    match language {
        Language::En => format!(
            "Rate how well the answer is supported by the excerpts, from 0 (not supported) \
             to 1 (fully supported). Reply with a single number and nothing else.\n\n\
             [Excerpts]\n{}\n[Question]\n{}\n\n[Answer]\n{}\n\n[Score]\n",
            context, question, answer
        ),
        Language::Ja => format!(
            "回答が論文の内容によってどの程度裏付けられているかを、0（裏付けなし）から1（完全に裏付けあり）の\
             数値で評価してください。数値のみを出力してください。\n\n\
             【論文の内容】\n{}\n【質問】\n{}\n\n【回答】\n{}\n\n【スコア】\n",
            context, question, answer
        ),
    }
}

/// Asks for an abstract that would answer the question; its embedding is used
/// as the second retrieval query.
pub fn hypothetical_abstract_prompt(language: Language, question: &str) -> String {
    match language {
        Language::En => format!(
            "Write a short scientific paper abstract (3-4 sentences) that would answer \
             the following question. Use the terminology a paper on the topic would use.\n\n\
             [Question]\n{}\n\n[Abstract]\n",
            question
        ),
        Language::Ja => format!(
            "次の質問に答える論文の要旨を、専門用語を用いて3〜4文で書いてください。\n\n\
             【質問】\n{}\n\n【要旨】\n",
            question
        ),
    }
}

pub fn insufficient_evidence(language: Language) -> &'static str {
    match language {
        Language::En => {
            "The indexed papers do not contain enough evidence to answer this question. \
             Try narrowing the question or selecting specific papers."
        }
        Language::Ja => {
            "申し訳ございません。インデックス済みの論文には、この質問に回答するための十分な根拠が見つかりませんでした。\
             質問を絞り込むか、対象の論文を指定してください。"
        }
    }
}

/// Extract a support score from model output.
///
/// Scale descriptions such as `0-1` are ignored and `a/b` or `a out of b`
/// read as fractions. The first score after a colon wins, then the first
/// score already in `[0, 1]`, then the first score at all. Values in
/// `(1, 100]` are read as percentages and the result is clamped to `[0, 1]`.
/// Output without a number scores 0.
pub fn parse_support_score(raw: &str) -> f32 {
    let Some(value) = pick_score(raw) else {
        warn!(output = %raw.chars().take(80).collect::<String>(), "support score not parseable; using 0");
        return 0.0;
    };
    let value = if value > 1.0 && value <= 100.0 { value / 100.0 } else { value };
    value.clamp(0.0, 1.0)
}

const RANGE_SEPARATORS: [&str; 5] = ["-", "–", "~", "〜", "to"];
const FRACTION_SEPARATORS: [&str; 2] = ["/", "out of"];

#[derive(Debug, Clone, Copy)]
struct Number {
    start: usize,
    end: usize,
    value: f32,
}

fn pick_score(raw: &str) -> Option<f32> {
    let scores = scores(raw);
    let colon = raw.find([':', '：']);
    colon
        .and_then(|at| scores.iter().find(|(start, _)| *start > at))
        .or_else(|| scores.iter().find(|(_, v)| (0.0..=1.0).contains(v)))
        .or_else(|| scores.first())
        .map(|&(_, v)| v)
}

/// Candidate scores with their byte offsets, ranges dropped and fractions
/// folded.
fn scores(raw: &str) -> Vec<(usize, f32)> {
    let numbers = numbers(raw);
    let mut out = Vec::new();
    let mut i = 0;
    while i < numbers.len() {
        let a = numbers[i];
        if let Some(b) = numbers.get(i + 1).copied() {
            let gap = raw[a.end..b.start].trim();
            let signed_next = raw[b.start..].starts_with('-');
            if RANGE_SEPARATORS.contains(&gap) || (gap.is_empty() && signed_next) {
                i += 2;
                continue;
            }
            if FRACTION_SEPARATORS.contains(&gap) && b.value > 0.0 {
                out.push((a.start, a.value / b.value));
                i += 2;
                continue;
            }
        }
        out.push((a.start, a.value));
        i += 1;
    }
    out
}

fn numbers(raw: &str) -> Vec<Number> {
    let bytes = raw.as_bytes();
    let digit_at = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let leading_dot = bytes[i] == b'.' && digit_at(i + 1);
        if !digit_at(i) && !leading_dot {
            i += 1;
            continue;
        }
        let mut start = i;
        if start > 0 && bytes[start - 1] == b'-' && (start < 2 || !bytes[start - 2].is_ascii_alphanumeric()) {
            start -= 1;
        }
        let mut seen_dot = leading_dot;
        let mut end = i + 1;
        while end < bytes.len() {
            match bytes[end] {
                b'0'..=b'9' => end += 1,
                b'.' if !seen_dot && digit_at(end + 1) => {
                    seen_dot = true;
                    end += 1;
                }
                _ => break,
            }
        }
        if let Ok(value) = raw[start..end].parse() {
            out.push(Number { start, end, value });
        }
        i = end;
    }
    out
}
