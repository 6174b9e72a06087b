//! In-memory record store.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::capture::{CaptureRecord, DocumentId};
use crate::storage::{RecordStore, StoreError, StoreResult};

/// A record table backed by a concurrent map. Nothing survives a restart,
/// so `insert_recovery` is the same as `set`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<DocumentId, CaptureRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn set(&self, id: DocumentId, record: &CaptureRecord) -> StoreResult<()> {
        self.records.insert(id, record.clone());
        Ok(())
    }

    async fn insert_recovery(&self, id: DocumentId, record: &CaptureRecord) -> StoreResult<()> {
        self.set(id, record).await
    }

    async fn read(&self, id: DocumentId) -> StoreResult<CaptureRecord> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::sample_response;

    #[tokio::test]
    async fn test_overwrite_by_id() {
        let store = MemoryStore::new();
        let id = DocumentId::new(2);

        store.set(id, &CaptureRecord::Response(sample_response(200))).await.unwrap();
        store.set(id, &CaptureRecord::Response(sample_response(404))).await.unwrap();

        assert_eq!(store.len(), 1);
        match store.read(id).await.unwrap() {
            CaptureRecord::Response(r) => assert_eq!(r.status, 404),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read(DocumentId::new(77)).await,
            Err(StoreError::NotFound(id)) if id.as_u64() == 77
        ));
    }
}
