//! In-memory record storage.

use crate::types::{Record, RecordKind, RetrievalConfig};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Bounded record store. The oldest record is evicted past `max_records`.
pub struct RecordStore {
    max_records: usize,
    records: RwLock<VecDeque<Record>>,
}

impl RecordStore {
    pub fn new(config: &RetrievalConfig) -> Self {
        info!(max_records = config.max_records, "Initializing record store");
        Self {
            max_records: config.max_records.max(1),
            records: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn add(&self, record: Record) {
        debug!(record_id = %record.id, kind = ?record.kind, "Adding record");

        let mut records = self.records.write().await;
        records.push_back(record);
        while records.len() > self.max_records {
            if let Some(evicted) = records.pop_front() {
                debug!(record_id = %evicted.id, "Evicted record");
            }
        }
    }

    pub async fn extend(&self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.add(record).await;
        }
    }

    pub async fn all(&self) -> Vec<Record> {
        self.records.read().await.iter().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Record> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub async fn by_kind(&self, kind: RecordKind) -> Vec<Record> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}
