//! Importance-based context compression.

use serde::{Deserialize, Serialize};
use switchboard_common::text::{fold, truncate_chars, words};
use switchboard_common::ConversationTurn;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token count (~4 chars per token, rounded up).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

const IMPORTANT_MARKERS: &[&str] = &[
    "importante",
    "urgente",
    "critico",
    "prazo",
    "decisao",
    "objetivo",
    "resultado",
    "problema",
    "erro",
    "atencao",
    "obrigatorio",
    "nunca",
    "sempre",
    "important",
    "urgent",
    "critical",
    "deadline",
    "must",
];

const STOP_WORDS: &[&str] = &[
    "a", "o", "as", "os", "um", "uma", "de", "do", "da", "dos", "das", "em", "no", "na", "nos",
    "nas", "por", "para", "com", "que", "e", "ou", "se", "the", "an", "of", "to", "and", "or",
    "in", "is",
];

/// Outcome of compressing one piece of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionResult {
    pub text: String,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub kept_units: usize,
    pub dropped_units: usize,
}

impl CompressionResult {
    pub fn was_compressed(&self) -> bool {
        self.compressed_tokens < self.original_tokens
    }

    pub fn tokens_removed(&self) -> usize {
        self.original_tokens.saturating_sub(self.compressed_tokens)
    }
}

/// Scores sentence-like units and keeps the most informative ones.
#[derive(Debug, Clone)]
pub struct ContextCompressor {
    markers: Vec<String>,
    stop_words: Vec<String>,
}

impl Default for ContextCompressor {
    fn default() -> Self {
        Self {
            markers: IMPORTANT_MARKERS.iter().map(|s| s.to_string()).collect(),
            stop_words: STOP_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ContextCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add domain-specific importance markers.
    pub fn with_markers(mut self, markers: impl IntoIterator<Item = String>) -> Self {
        self.markers.extend(markers.into_iter().map(|m| fold(&m)));
        self
    }

    /// Split on sentence punctuation and line breaks, keeping the punctuation.
    pub fn split_units(text: &str) -> Vec<&str> {
        let mut units = Vec::new();
        let mut start = 0;
        for (idx, c) in text.char_indices() {
            if matches!(c, '.' | '!' | '?' | '\n') {
                let end = idx + c.len_utf8();
                let unit = text[start..end].trim();
                if !unit.is_empty() && unit.chars().any(char::is_alphanumeric) {
                    units.push(unit);
                }
                start = end;
            }
        }
        let tail = text[start..].trim();
        if !tail.is_empty() {
            units.push(tail);
        }
        units
    }

    /// +5 per importance marker, -1 per stop-word, +3 for digits,
    /// +2 for ':' or '-', +2 for 10..=30 words.
    pub fn score_unit(&self, unit: &str) -> i32 {
        let folded = fold(unit);
        let unit_words = words(unit);
        let mut score = 0i32;

        for marker in &self.markers {
            score += 5 * folded.matches(marker.as_str()).count() as i32;
        }
        score -= unit_words
            .iter()
            .filter(|w| self.stop_words.iter().any(|s| s == *w))
            .count() as i32;
        if unit.chars().any(|c| c.is_ascii_digit()) {
            score += 3;
        }
        if unit.contains(':') || unit.contains('-') {
            score += 2;
        }
        if (10..=30).contains(&unit_words.len()) {
            score += 2;
        }
        score
    }

    /// Reduce `text` to at most `budget_tokens` estimated tokens.
    ///
    /// Units are taken greedily by descending score and emitted in that
    /// order, followed by a note counting the units left out.
    pub fn compress(&self, text: &str, budget_tokens: usize) -> CompressionResult {
        let original_tokens = estimate_tokens(text);
        if original_tokens <= budget_tokens {
            return CompressionResult {
                text: text.to_string(),
                original_tokens,
                compressed_tokens: original_tokens,
                kept_units: Self::split_units(text).len(),
                dropped_units: 0,
            };
        }

        let units = Self::split_units(text);
        let mut ranked: Vec<(usize, i32)> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (i, self.score_unit(u)))
            .collect();
        // Stable sort keeps earlier units first on equal scores.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let char_budget = budget_tokens * CHARS_PER_TOKEN;
        // Room for "\n" plus the widest possible omission note.
        let reserve = 1 + omission_note(units.len()).chars().count();
        let unit_budget = char_budget.saturating_sub(reserve);

        let mut kept: Vec<String> = Vec::new();
        let mut used = 0usize;
        for &(idx, _) in &ranked {
            let unit = units[idx];
            let len = unit.chars().count();
            let extra = if kept.is_empty() { len } else { len + 1 };
            if used + extra <= unit_budget {
                kept.push(unit.to_string());
                used += extra;
            }
        }

        // Nothing fits whole: cut the best unit down to the budget.
        if kept.is_empty() && unit_budget > 0 {
            if let Some(&(idx, _)) = ranked.first() {
                kept.push(truncate_chars(units[idx], unit_budget).to_string());
            }
        }

        let dropped = units.len().saturating_sub(kept.len());
        let mut compressed = kept.join(" ");
        if dropped > 0 {
            if !compressed.is_empty() {
                compressed.push('\n');
            }
            compressed.push_str(&omission_note(dropped));
        }
        if compressed.chars().count() > char_budget {
            compressed = truncate_chars(&compressed, char_budget).to_string();
        }

        CompressionResult {
            compressed_tokens: estimate_tokens(&compressed),
            text: compressed,
            original_tokens,
            kept_units: kept.len(),
            dropped_units: dropped,
        }
    }

    /// Keep at most `max_turns` turns: always the first and the last, plus
    /// the best-scored turns in between. Chronological order is preserved.
    pub fn optimize_history(
        &self,
        turns: &[ConversationTurn],
        max_turns: usize,
    ) -> Vec<ConversationTurn> {
        if turns.len() <= max_turns {
            return turns.to_vec();
        }
        match max_turns {
            0 => return Vec::new(),
            1 => return turns.last().cloned().into_iter().collect(),
            _ => {}
        }

        let last = turns.len() - 1;
        let mut middle: Vec<(usize, i32)> = (1..last)
            .map(|i| (i, self.score_unit(&turns[i].content)))
            .collect();
        // Prefer recent turns on equal scores.
        middle.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

        let mut keep: Vec<usize> = middle
            .into_iter()
            .take(max_turns - 2)
            .map(|(i, _)| i)
            .collect();
        keep.push(0);
        keep.push(last);
        keep.sort_unstable();

        keep.into_iter().map(|i| turns[i].clone()).collect()
    }
}

fn omission_note(dropped: usize) -> String {
    format!("[... {dropped} trechos omitidos]")
}
