//! Corrective retrieval: at most two retrieval cycles per question.
//!
//! `Baseline` searches with the question itself. When its answer is not
//! supported well enough the loop moves to `Reformulated`, which searches with
//! a hypothetical abstract instead. A second miss ends in `Exhausted`, which
//! still produces a full answer flagged as degraded.
use std::fmt;

use papersmith_core::types::{RagAnswer, SearchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Baseline,
    Reformulated,
    Exhausted,
}

impl Stage {
    /// What follows an attempt made in this stage. `None` means the attempt
    /// is accepted as the answer.
    pub fn after(self, attempt: &Attempt, threshold: f32) -> Option<Stage> {
        if attempt.is_supported(threshold) {
            return None;
        }
        Some(match self {
            Stage::Baseline => Stage::Reformulated,
            Stage::Reformulated | Stage::Exhausted => Stage::Exhausted,
        })
    }

    pub fn attempt_number(self) -> u8 {
        match self {
            Stage::Baseline => 1,
            Stage::Reformulated | Stage::Exhausted => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Baseline => "baseline",
            Stage::Reformulated => "reformulated",
            Stage::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Outcome of one retrieve-generate-score cycle.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub stage: Stage,
    /// `None` when the search came back empty and generation was skipped.
    pub answer: Option<String>,
    pub sources: Vec<SearchResult>,
    pub score: f32,
}

impl Attempt {
    pub fn empty(stage: Stage) -> Self {
        Self { stage, answer: None, sources: Vec::new(), score: 0.0 }
    }

    pub fn is_supported(&self, threshold: f32) -> bool {
        self.answer.is_some() && self.score >= threshold
    }

    pub fn accept(self) -> RagAnswer {
        RagAnswer {
            answer_text: self.answer.unwrap_or_default(),
            sources: self.sources,
            support_score: self.score,
            attempts: self.stage.attempt_number(),
            degraded: false,
        }
    }
}

/// Degraded answer after both attempts fell short. Sources come from the
/// better-scoring attempt (baseline on a tie), or from whichever attempt found
/// anything; the reported score is the second attempt's.
pub fn exhausted(baseline: Attempt, reformulated: Attempt, message: &str) -> RagAnswer {
    let support_score = reformulated.score;
    let (better, other) = if reformulated.score > baseline.score {
        (reformulated, baseline)
    } else {
        (baseline, reformulated)
    };
    let sources = if better.sources.is_empty() { other.sources } else { better.sources };
    RagAnswer { answer_text: message.to_string(), sources, support_score, attempts: 2, degraded: true }
}
