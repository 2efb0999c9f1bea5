//! Intent categories and classification results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inferred category of a user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// Retrieval over stored records
    Search,
    /// Brainstorming and suggestions
    Ideation,
    /// Comparison, trends and evaluation
    Analysis,
    /// No category matched
    General,
    /// Several categories matched with comparable strength
    Multiple,
}

impl IntentCategory {
    /// Categories that have a specialised worker, in declaration order.
    pub const SPECIALISED: [IntentCategory; 3] = [Self::Search, Self::Ideation, Self::Analysis];

    /// Registration name of the worker handling this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Ideation => "ideation",
            Self::Analysis => "analysis",
            Self::General => "general",
            Self::Multiple => "multiple",
        }
    }

    /// Section title shown to users.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Search => "Busca",
            Self::Ideation => "Ideias",
            Self::Analysis => "Análise",
            Self::General => "Geral",
            Self::Multiple => "Múltiplos pedidos",
        }
    }

    /// One-line capability description used by help text.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Search => "encontrar registros, documentos e conversas anteriores",
            Self::Ideation => "sugerir ideias, temas e abordagens novas",
            Self::Analysis => "comparar, avaliar e identificar tendências",
            Self::General => "responder perguntas gerais",
            Self::Multiple => "tratar vários pedidos na mesma mensagem",
        }
    }

    pub fn is_specialised(&self) -> bool {
        Self::SPECIALISED.contains(self)
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "search" => Some(Self::Search),
            "ideation" => Some(Self::Ideation),
            "analysis" => Some(Self::Analysis),
            "general" => Some(Self::General),
            "multiple" => Some(Self::Multiple),
            _ => None,
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one message. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub category: IntentCategory,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Keyword hits per specialised category, in declaration order
    #[serde(default)]
    pub hits: Vec<(IntentCategory, usize)>,
}

impl IntentResult {
    pub fn new(category: IntentCategory, confidence: f32) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            hits: Vec::new(),
        }
    }

    pub fn with_hits(mut self, hits: Vec<(IntentCategory, usize)>) -> Self {
        self.hits = hits;
        self
    }

    pub fn is_multiple(&self) -> bool {
        self.category == IntentCategory::Multiple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names_round_trip() {
        for category in IntentCategory::SPECIALISED {
            assert_eq!(IntentCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(IntentCategory::parse("unknown"), None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(IntentResult::new(IntentCategory::Search, 3.0).confidence, 1.0);
        assert_eq!(IntentResult::new(IntentCategory::Search, -1.0).confidence, 0.0);
    }

    #[test]
    fn test_only_closed_set_is_specialised() {
        assert!(IntentCategory::Analysis.is_specialised());
        assert!(!IntentCategory::General.is_specialised());
        assert!(!IntentCategory::Multiple.is_specialised());
    }
}
