//! Retrieval contract and the in-process keyword retriever.

use crate::store::RecordStore;
use crate::types::{RankedRecord, Record, RetrievalConfig, SearchFilters};
use async_trait::async_trait;
use std::sync::Arc;
use switchboard_common::text::{fold, words};
use switchboard_common::Result;
use tracing::debug;

/// Full-text / similarity search over stored records.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return records relevant to `terms`, best first.
    async fn search(&self, terms: &str, filters: &SearchFilters) -> Result<Vec<RankedRecord>>;
}

/// Terms shorter than this are ignored when scoring.
const MIN_TERM_LEN: usize = 3;

/// Ranks records by how often the query terms appear in them.
pub struct KeywordRetriever {
    store: Arc<RecordStore>,
    config: RetrievalConfig,
}

impl KeywordRetriever {
    pub fn new(store: Arc<RecordStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    fn score(terms: &[String], record: &Record) -> f32 {
        let title = fold(&record.title);
        let content = fold(&record.content);
        let tags: Vec<String> = record.tags.iter().map(|t| fold(t)).collect();

        let mut score = 0.0;
        for term in terms {
            if title.contains(term.as_str()) {
                score += 2.0;
            }
            score += content.matches(term.as_str()).count().min(5) as f32;
            if tags.iter().any(|t| t == term) {
                score += 1.5;
            }
        }
        if score > 0.0 {
            score += record.importance;
        }
        score
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn search(&self, terms: &str, filters: &SearchFilters) -> Result<Vec<RankedRecord>> {
        let limit = filters.limit.unwrap_or(self.config.max_results);
        let query_terms: Vec<String> = words(terms)
            .into_iter()
            .filter(|t| t.chars().count() >= MIN_TERM_LEN)
            .collect();

        debug!(terms = %terms, term_count = query_terms.len(), limit, "Searching records");

        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<RankedRecord> = self
            .store
            .all()
            .await
            .into_iter()
            .filter(|r| filters.matches(r))
            .filter_map(|record| {
                let score = Self::score(&query_terms, &record);
                (score >= self.config.min_score).then_some(RankedRecord { record, score })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}
