// src/error.rs
use thiserror::Error;

use crate::storage::StoreError;

/// Failures that end an invocation (or, for backfill, the current sweep).
///
/// "No new records" is deliberately absent: an up-to-date source is a normal
/// outcome, not an error.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Upstream request failed, returned a non-2xx status or a body that is
    /// not a JSON array of records.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("storage read failed for `{key}`: {source}")]
    StorageRead {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("storage write failed for `{key}`: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IngestError {
    pub fn read(key: &str, source: StoreError) -> Self {
        Self::StorageRead {
            key: key.to_string(),
            source,
        }
    }

    pub fn write(key: &str, source: StoreError) -> Self {
        Self::StorageWrite {
            key: key.to_string(),
            source,
        }
    }

    /// Short machine-friendly label, used for metrics and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::StorageRead { .. } => "storage_read",
            Self::StorageWrite { .. } => "storage_write",
            Self::Config(_) => "config",
        }
    }
}
