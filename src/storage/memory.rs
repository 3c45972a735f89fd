//! In-process object and document stores for tests and offline runs.

use super::{DocumentStore, ObjectStore};
use crate::error::{LiewaveError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type Document = Map<String, Value>;

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    reads: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), bytes);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, path: &str) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .ok_or_else(|| LiewaveError::NotFound {
                path: path.to_string(),
            })
    }
}

/// Document store keeping `(collection, id) → fields` in memory.
///
/// Writes merge top-level fields and stamp `timestamp` with the local clock
/// in RFC 3339, standing in for a server-assigned time.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<(String, String), Document>>,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Total successful upserts, including rewrites of the same document.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        let document = documents
            .entry((collection.to_string(), id.to_string()))
            .or_default();
        document.extend(fields);
        document.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
