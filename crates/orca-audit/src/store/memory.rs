use async_trait::async_trait;
use tokio::sync::Mutex;

use super::AuditStore;
use crate::entry::{AuditEntry, AuditRecord, GENESIS_PREV_HASH};
use crate::Result;

/// Process-local chain. The mutex is held across head read and push.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<AuditEntry> {
        let mut entries = self.entries.lock().await;
        let prev_hash = entries
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_PREV_HASH.to_string());
        let entry = AuditEntry::chain(record, prev_hash);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn latest_hash(&self) -> Result<Option<String>> {
        Ok(self.entries.lock().await.last().map(|e| e.entry_hash.clone()))
    }

    async fn list_all(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.lock().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_append_links_onto_head() {
        let store = InMemoryAuditStore::new();
        assert_eq!(store.latest_hash().await.unwrap(), None);

        let first = tokio_test::assert_ok!(store.append(AuditRecord::new("login", "u1", "success", Value::Null)).await);
        let second = tokio_test::assert_ok!(store.append(AuditRecord::new("logout", "u1", "success", Value::Null)).await);

        assert_eq!(first.prev_hash, "");
        assert_eq!(second.prev_hash, first.entry_hash);
        assert_eq!(store.latest_hash().await.unwrap(), Some(second.entry_hash));
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
