//! In-memory storage implementation, for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::storage::{SeenRecord, SeenStore};

/// Seen store with no persistence. Loses everything on drop.
#[derive(Default)]
pub struct MemorySeenStore {
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    async fn has(&self, id: &str) -> Result<bool> {
        Ok(self.seen.read().await.contains_key(id))
    }

    async fn record(&self, id: &str, first_seen_at: DateTime<Utc>) -> Result<()> {
        self.seen
            .write()
            .await
            .entry(id.to_string())
            .or_insert(first_seen_at);
        Ok(())
    }

    async fn record_all(&self, records: &[SeenRecord]) -> Result<()> {
        let mut seen = self.seen.write().await;
        for record in records {
            seen.entry(record.id.clone()).or_insert(record.first_seen_at);
        }
        Ok(())
    }

    async fn count(&self) -> usize {
        self.seen.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_membership() {
        let store = MemorySeenStore::new();
        assert!(!store.has("1").await.unwrap());

        store.record("1", Utc::now()).await.unwrap();
        assert!(store.has("1").await.unwrap());
        assert_eq!(store.count().await, 1);
    }
}
