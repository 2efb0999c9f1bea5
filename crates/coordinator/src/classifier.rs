//! Keyword-based intent classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use switchboard_common::text::fold;
use switchboard_common::{IntentCategory, IntentResult};
use tracing::debug;

// =============================================================================
// Keyword Lists
// =============================================================================
//
// Entries are folded (lower-case, no accents) stems, matched as substrings of
// the folded message. No entry contains another entry of the same list.

const SEARCH_KEYWORDS: &[&str] = &[
    "busca",
    "busque",
    "procur",
    "encontr",
    "pesquis",
    "localiz",
    "achar",
    "onde esta",
    "onde fica",
    "search",
    "find",
    "look up",
    "lookup",
];

const IDEATION_KEYWORDS: &[&str] = &[
    "ideia",
    "idea",
    "sugest",
    "sugir",
    "sugerir",
    "brainstorm",
    "criativ",
    "inova",
    "inspira",
    "alternativa",
    "proposta",
    "suggest",
];

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analis",
    "analys",
    "analyz",
    "avali",
    "compar",
    "tendencia",
    "estatistic",
    "metrica",
    "diagnostic",
    "resum",
    "evaluat",
    "insight",
];

fn builtin_keywords(category: IntentCategory) -> &'static [&'static str] {
    match category {
        IntentCategory::Search => SEARCH_KEYWORDS,
        IntentCategory::Ideation => IDEATION_KEYWORDS,
        IntentCategory::Analysis => ANALYSIS_KEYWORDS,
        IntentCategory::General | IntentCategory::Multiple => &[],
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// Maps a message to an intent. Replaceable without touching the
/// orchestrator.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> IntentResult;

    /// Every specialised category the message touches, in declaration order;
    /// `[General]` when none.
    fn decompose(&self, text: &str) -> Vec<IntentCategory>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// A runner-up with at least this share of the top hit count makes the
    /// message "multiple"
    #[serde(default = "default_multiple_ratio")]
    pub multiple_ratio: f32,

    /// Hit count at which single-category confidence saturates at 1.0
    #[serde(default = "default_saturation_hits")]
    pub saturation_hits: usize,

    /// Extra keywords per category name ("search", "ideation", "analysis")
    #[serde(default)]
    pub extra_keywords: BTreeMap<String, Vec<String>>,
}

fn default_multiple_ratio() -> f32 {
    0.7
}

fn default_saturation_hits() -> usize {
    5
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            multiple_ratio: default_multiple_ratio(),
            saturation_hits: default_saturation_hits(),
            extra_keywords: BTreeMap::new(),
        }
    }
}

/// Counts keyword hits per category.
pub struct KeywordClassifier {
    config: ClassifierConfig,
    keywords: Vec<(IntentCategory, Vec<String>)>,
}

impl KeywordClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let keywords = IntentCategory::SPECIALISED
            .iter()
            .map(|&category| {
                let mut list: Vec<String> = builtin_keywords(category)
                    .iter()
                    .map(|k| k.to_string())
                    .collect();
                if let Some(extra) = config.extra_keywords.get(category.as_str()) {
                    list.extend(extra.iter().map(|k| fold(k.trim())).filter(|k| !k.is_empty()));
                }
                list.sort();
                list.dedup();
                (category, list)
            })
            .collect();
        Self { config, keywords }
    }

    /// Distinct keywords of each category found in `text`.
    pub fn hits(&self, text: &str) -> Vec<(IntentCategory, usize)> {
        let folded = fold(text);
        self.keywords
            .iter()
            .map(|(category, list)| {
                let count = list.iter().filter(|k| folded.contains(k.as_str())).count();
                (*category, count)
            })
            .collect()
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> IntentResult {
        let hits = self.hits(text);

        // First category wins ties, so declaration order breaks them.
        let top = hits
            .iter()
            .copied()
            .fold(None::<(IntentCategory, usize)>, |best, (category, count)| {
                match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((category, count)),
                }
            });

        let result = match top {
            None | Some((_, 0)) => IntentResult::new(IntentCategory::General, 0.5),
            Some((top_category, top_count)) => {
                let threshold = self.config.multiple_ratio * top_count as f32;
                let contested = hits
                    .iter()
                    .any(|&(c, n)| c != top_category && n > 0 && n as f32 >= threshold);
                if contested {
                    IntentResult::new(IntentCategory::Multiple, 0.8)
                } else {
                    let saturation = self.config.saturation_hits.max(1) as f32;
                    IntentResult::new(top_category, (top_count as f32 / saturation).min(1.0))
                }
            }
        }
        .with_hits(hits);

        debug!(
            category = %result.category,
            confidence = result.confidence,
            "Classified message"
        );
        result
    }

    fn decompose(&self, text: &str) -> Vec<IntentCategory> {
        let matched: Vec<IntentCategory> = self
            .hits(text)
            .into_iter()
            .filter(|&(_, n)| n > 0)
            .map(|(c, _)| c)
            .collect();
        if matched.is_empty() {
            vec![IntentCategory::General]
        } else {
            matched
        }
    }
}
