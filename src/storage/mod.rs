// src/storage/mod.rs
//! Key-addressed blob storage used for batch blobs, the watermark and the
//! backfill cursor. Keys are deterministic, so no listing is needed.

pub mod azure;
pub mod local;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::IngestError;

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("blob service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blob key `{0}`")]
    InvalidKey(String),

    #[error("corrupt blob content: {0}")]
    Corrupt(String),

    /// Raised by [`memory::MemoryBlobStore`] when a failure is armed.
    #[error("injected storage failure")]
    Injected,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// `Ok(None)` means the blob does not exist; every other fault is an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Whether `key` exists. Backends that can answer without transferring
    /// the body override this.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Create or overwrite `key`. Treated as atomic by callers.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    fn name(&self) -> &'static str;
}

/// Pick a backend from `BLOB_CONN_STR`:
/// - `memory:` keeps everything in process (dry runs, demos)
/// - `file:<dir>` writes under `<dir>/<container>/`
/// - anything else is parsed as an Azure Storage connection string
pub fn open_store(conn_str: &str, container: &str) -> Result<Arc<dyn BlobStore>, IngestError> {
    let conn_str = conn_str.trim();
    if conn_str.eq_ignore_ascii_case("memory:") {
        return Ok(Arc::new(memory::MemoryBlobStore::new()));
    }
    if let Some(dir) = conn_str.strip_prefix("file:") {
        let dir = dir.trim_start_matches("//");
        if dir.is_empty() {
            return Err(IngestError::Config(
                "file: connection string needs a directory".into(),
            ));
        }
        return Ok(Arc::new(local::LocalBlobStore::new(
            std::path::Path::new(dir).join(container),
        )));
    }
    let store = azure::AzureBlobStore::from_connection_string(conn_str, container)?;
    Ok(Arc::new(store))
}

/// Reject keys that would escape the container or address nothing.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
