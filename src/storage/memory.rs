// src/storage/memory.rs
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{validate_key, BlobStore, StoreError};

type FailWhen = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// In-process store. Also the test double: writes (or reads) can be made to
/// fail for keys matching a predicate.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: Mutex<Option<FailWhen>>,
    fail_reads: Mutex<Option<FailWhen>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `put` whose key satisfies `pred` fails with [`StoreError::Injected`]
    /// until [`clear_failures`](Self::clear_failures) is called.
    pub fn fail_writes_when<F>(&self, pred: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        *self.fail_writes.lock().unwrap() = Some(Box::new(pred));
    }

    pub fn fail_reads_when<F>(&self, pred: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        *self.fail_reads.lock().unwrap() = Some(Box::new(pred));
    }

    pub fn clear_failures(&self) {
        *self.fail_writes.lock().unwrap() = None;
        *self.fail_reads.lock().unwrap() = None;
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    /// Parse a stored blob as JSON; `None` when missing or not JSON.
    pub fn read_json(&self, key: &str) -> Option<serde_json::Value> {
        self.read(key)
            .and_then(|b| serde_json::from_slice(&b).ok())
    }

    /// Keys of batch blobs, i.e. everything except the state files.
    pub fn batch_keys(&self) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.contains('/'))
            .collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        if let Some(pred) = self.fail_reads.lock().unwrap().as_ref() {
            if pred(key) {
                return Err(StoreError::Injected);
            }
        }
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        if let Some(pred) = self.fail_writes.lock().unwrap().as_ref() {
            if pred(key) {
                return Err(StoreError::Injected);
            }
        }
        self.blobs.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
