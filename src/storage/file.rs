//! File-backed record store.
//!
//! One JSON document per record, named `<docid>.json`. Writes go to a
//! unique temporary file first and are renamed into place, so a reader
//! never sees a half-written record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::capture::{CaptureRecord, DocumentId};
use crate::storage::{RecordStore, StoreError, StoreResult};

/// A record table stored as a directory of JSON files.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the table directory.
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: DocumentId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, id: DocumentId, record: &CaptureRecord, durable: bool) -> StoreResult<()> {
        let encoded = serde_json::to_vec(record)?;
        let tmp = self
            .dir
            .join(format!(".{id}.json.{}", uuid::Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&encoded).await?;
            if durable {
                file.sync_all().await?;
            }
            drop(file);
            fs::rename(&tmp, self.record_path(id)).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::Io(e));
        }

        if durable {
            sync_dir(&self.dir).await?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl RecordStore for FileStore {
    async fn set(&self, id: DocumentId, record: &CaptureRecord) -> StoreResult<()> {
        self.write(id, record, false).await
    }

    async fn insert_recovery(&self, id: DocumentId, record: &CaptureRecord) -> StoreResult<()> {
        self.write(id, record, true).await
    }

    async fn read(&self, id: DocumentId) -> StoreResult<CaptureRecord> {
        let raw = match fs::read(self.record_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::sample_response;

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("responses")).await.unwrap();
        let id = DocumentId::new(12);

        store
            .insert_recovery(id, &CaptureRecord::Response(sample_response(201)))
            .await
            .unwrap();
        store
            .set(id, &CaptureRecord::Response(sample_response(202)))
            .await
            .unwrap();

        match store.read(id).await.unwrap() {
            CaptureRecord::Response(r) => assert_eq!(r.status, 202),
            other => panic!("unexpected record {other:?}"),
        }
        assert!(store.dir().join("12.json").exists());

        // No temporaries left behind.
        let mut entries = std::fs::read_dir(store.dir()).unwrap();
        assert_eq!(entries.by_ref().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.read(DocumentId::new(1)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("4.json"), b"{not json").unwrap();
        assert!(matches!(
            store.read(DocumentId::new(4)).await,
            Err(StoreError::Encoding(_))
        ));
    }
}
