//! Persistence of capture records.
//!
//! # Data Flow
//! ```text
//! Interceptor
//!     → CaptureStore::save_request  → requests table  (insert_recovery)
//!     → CaptureStore::save_response → responses table (set)
//!
//! Admin API
//!     → CaptureStore::request / response → read by document id
//! ```
//!
//! # Design Decisions
//! - Backends only see opaque `CaptureRecord`s keyed by `DocumentId`
//! - Writes either land completely or fail; no partial records
//! - Callers log failures and carry on

pub mod file;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::capture::{CaptureRecord, DocumentId, RequestRecord, ResponseRecord};
use crate::config::{StorageBackend, StorageConfig};
use crate::observability::metrics;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors raised by record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record under this id.
    #[error("no record for document {0}")]
    NotFound(DocumentId),

    /// The record exists but is not of the requested kind.
    #[error("document {id} holds a {found} record, expected {expected}")]
    KindMismatch {
        id: DocumentId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A key/value table of capture records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write `record` under `id`, replacing any previous one.
    async fn set(&self, id: DocumentId, record: &CaptureRecord) -> StoreResult<()>;

    /// Like [`RecordStore::set`], but durable before returning.
    async fn insert_recovery(&self, id: DocumentId, record: &CaptureRecord) -> StoreResult<()>;

    /// Read the record under `id`.
    async fn read(&self, id: DocumentId) -> StoreResult<CaptureRecord>;
}

/// The request and response tables.
#[derive(Clone)]
pub struct CaptureStore {
    requests: Arc<dyn RecordStore>,
    responses: Arc<dyn RecordStore>,
}

impl CaptureStore {
    pub fn new(requests: Arc<dyn RecordStore>, responses: Arc<dyn RecordStore>) -> Self {
        Self { requests, responses }
    }

    /// Both tables in memory.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Open the backend selected by the configuration.
    pub async fn open(config: &StorageConfig) -> StoreResult<Self> {
        match config.backend {
            StorageBackend::Memory => Ok(Self::memory()),
            StorageBackend::File => {
                let root = Path::new(&config.data_dir);
                let requests = FileStore::open(root.join("requests")).await?;
                let responses = FileStore::open(root.join("responses")).await?;
                tracing::info!(data_dir = %config.data_dir, "File record store opened");
                Ok(Self::new(Arc::new(requests), Arc::new(responses)))
            }
        }
    }

    /// Persist a request record. Uses the crash-safe write.
    pub async fn save_request(&self, id: DocumentId, record: RequestRecord) -> StoreResult<()> {
        let result = self
            .requests
            .insert_recovery(id, &CaptureRecord::Request(record))
            .await;
        metrics::record_write("requests", result.is_ok());
        result
    }

    /// Persist a response record.
    pub async fn save_response(&self, id: DocumentId, record: ResponseRecord) -> StoreResult<()> {
        let result = self.responses.set(id, &CaptureRecord::Response(record)).await;
        metrics::record_write("responses", result.is_ok());
        result
    }

    /// Read the request record for `id`.
    pub async fn request(&self, id: DocumentId) -> StoreResult<RequestRecord> {
        match self.requests.read(id).await? {
            CaptureRecord::Request(record) => Ok(record),
            other => Err(StoreError::KindMismatch {
                id,
                expected: "request",
                found: other.kind(),
            }),
        }
    }

    /// Read the response record for `id`.
    pub async fn response(&self, id: DocumentId) -> StoreResult<ResponseRecord> {
        match self.responses.read(id).await? {
            CaptureRecord::Response(record) => Ok(record),
            other => Err(StoreError::KindMismatch {
                id,
                expected: "response",
                found: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::FORMAT_VERSION;
    use std::collections::BTreeMap;

    pub(crate) fn sample_response(status: u16) -> ResponseRecord {
        ResponseRecord {
            format: FORMAT_VERSION,
            session_id: 1,
            now: 0,
            header: BTreeMap::new(),
            status,
            content_length: -1,
            dump: String::new(),
            body: String::new(),
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_typed_reads() {
        let store = CaptureStore::memory();
        let id = DocumentId::new(5);

        store.save_response(id, sample_response(200)).await.unwrap();
        assert_eq!(store.response(id).await.unwrap().status, 200);
        assert!(matches!(store.request(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let requests = Arc::new(MemoryStore::new());
        let store = CaptureStore::new(requests.clone(), Arc::new(MemoryStore::new()));
        let id = DocumentId::new(1);
        requests
            .set(id, &CaptureRecord::Response(sample_response(500)))
            .await
            .unwrap();

        let err = store.request(id).await.unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { found: "response", .. }));
    }
}
