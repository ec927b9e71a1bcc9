//! JSON file-backed audit log.
//!
//! The whole log is a single JSON array. Appends are read-modify-write:
//! load the array, push the record, write it to a sibling temp file and
//! rename over the original so readers never see a truncated file.
//!
//! Appends from one process are serialized through a mutex. Separate
//! processes writing the same file can still lose updates; the commit graph
//! remains the authoritative record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::storage_traits::{AuditRecord, AuditSink, StorageResult};

/// Audit log persisted as a JSON array at `path`.
#[derive(Debug)]
pub struct JsonFileAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileAuditLog {
    /// Open (lazily) the log at `path`. The file is created on first append.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StorageResult<Vec<AuditRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn persist(&self, records: &[AuditRecord]) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let body = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonFileAuditLog {
    async fn append(&self, record: AuditRecord) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        debug!(
            path = %self.path.display(),
            existing = records.len(),
            commit = %record.commit_id,
            "appending audit record"
        );
        records.push(record);
        self.persist(&records).await
    }

    async fn records(&self) -> StorageResult<Vec<AuditRecord>> {
        self.load().await
    }
}
