//! Record types and retrieval configuration.

use serde::{Deserialize, Serialize};
use switchboard_common::now_millis;

/// Kind of stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A past conversation or message
    Conversation,
    /// An imported document
    Document,
    /// A short note or fact
    Note,
}

impl RecordKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "conversation" => Some(Self::Conversation),
            "document" => Some(Self::Document),
            "note" => Some(Self::Note),
            _ => None,
        }
    }
}

/// A searchable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,

    pub kind: RecordKind,

    pub title: String,

    pub content: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Importance score (0.0 - 1.0), used as a tie-breaker
    #[serde(default = "default_importance")]
    pub importance: f32,

    /// Creation timestamp (Unix millis)
    pub created_at: u64,
}

fn default_importance() -> f32 {
    0.5
}

impl Record {
    pub fn new(kind: RecordKind, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("rec_{}", uuid::Uuid::new_v4().simple()),
            kind,
            title: title.into(),
            content: content.into(),
            tags: vec![],
            importance: default_importance(),
            created_at: now_millis(),
        }
    }

    pub fn document(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(RecordKind::Document, title, content)
    }

    pub fn note(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(RecordKind::Note, title, content)
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// A search hit with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRecord {
    pub record: Record,
    pub score: f32,
}

/// Optional narrowing applied to a search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub kind: Option<RecordKind>,

    /// Every listed tag must be present on the record
    #[serde(default)]
    pub tags: Vec<String>,

    /// Only records created at or after this Unix-millis timestamp
    #[serde(default)]
    pub since: Option<u64>,

    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchFilters {
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        self.tags.iter().all(|wanted| {
            record
                .tags
                .iter()
                .any(|t| t.eq_ignore_ascii_case(wanted))
        })
    }
}

/// Configuration for the in-process retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum records kept in the store
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Maximum records returned per search
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Minimum score for a record to be returned
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_max_records() -> usize {
    10_000
}

fn default_max_results() -> usize {
    5
}

fn default_min_score() -> f32 {
    1.0
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            max_results: default_max_results(),
            min_score: default_min_score(),
        }
    }
}
