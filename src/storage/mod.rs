//! Storage gateway: audio objects in, prediction records out.
//!
//! The gateway is the only place that knows how a logical audio path maps to
//! a record identity. Object and document backends sit behind the
//! `ObjectStore` and `DocumentStore` traits and are injected at startup.

pub mod firebase;
pub mod local;
pub mod memory;

use crate::config::{StorageBackend, StorageConfig};
use crate::defaults::RECORD_ID_SEPARATOR;
use crate::error::{LiewaveError, Result};
use crate::prediction::{PredictionRecord, PredictionResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub use firebase::{FirebaseStorage, Firestore};
pub use local::LocalObjectStore;
pub use memory::{MemoryDocumentStore, MemoryObjectStore};

/// Read access to stored audio objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the full object at `path`.
    ///
    /// Reports `NotFound`, `AuthFailure` or `TransientIo`.
    async fn get_object(&self, path: &str) -> Result<Vec<u8>>;
}

/// Keyed document writes with merge semantics.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Merge `fields` into document `id` of `collection`, creating it if needed.
    ///
    /// Fields present in the write replace stored fields of the same name,
    /// other stored fields survive. The store sets `timestamp` from its own clock.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;
}

/// Bytes fetched from the object store, tagged with their logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioObject {
    path: String,
    bytes: Vec<u8>,
}

impl AudioObject {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Record identity for a logical path: every `/` becomes `_`.
///
/// Object store paths only use `/` as a separator, so every other character
/// (backslash included) is kept to leave distinct paths distinct.
pub fn sanitize(path: &str) -> String {
    path.replace('/', &RECORD_ID_SEPARATOR.to_string())
}

#[derive(Clone)]
pub struct StorageGateway {
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    collection: String,
}

impl StorageGateway {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            documents,
            collection: collection.into(),
        }
    }

    /// Build the backends named by the storage configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let (objects, documents): (Arc<dyn ObjectStore>, Arc<dyn DocumentStore>) =
            match config.backend {
                StorageBackend::Firebase => {
                    let client = firebase::http_client(config)?;
                    (
                        Arc::new(FirebaseStorage::new(client.clone(), config)),
                        Arc::new(Firestore::new(client, config)),
                    )
                }
                StorageBackend::Local => (
                    Arc::new(LocalObjectStore::new(&config.local_root)),
                    Arc::new(MemoryDocumentStore::new()),
                ),
                StorageBackend::Memory => (
                    Arc::new(MemoryObjectStore::new()),
                    Arc::new(MemoryDocumentStore::new()),
                ),
            };
        Ok(Self::new(objects, documents, config.collection.clone()))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn fetch(&self, path: &str) -> Result<AudioObject> {
        if path.trim().is_empty() {
            return Err(LiewaveError::InvalidRequest {
                message: "audio path is empty".to_string(),
            });
        }
        let bytes = self.objects.get_object(path).await?;
        debug!("Fetched {} bytes from {}", bytes.len(), path);
        Ok(AudioObject::new(path, bytes))
    }

    /// Upsert the prediction for `path` and return the record id.
    ///
    /// Repeating the call rewrites the same document.
    pub async fn persist(
        &self,
        path: &str,
        user_id: &str,
        result: &PredictionResult,
    ) -> Result<String> {
        let record_id = sanitize(path);
        let record = PredictionRecord::new(path, user_id, result);
        self.documents
            .upsert(&self.collection, &record_id, record.to_fields())
            .await?;
        debug!("Persisted {}/{}", self.collection, record_id);
        Ok(record_id)
    }
}
