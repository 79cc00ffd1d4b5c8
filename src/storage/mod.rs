//! Object storage for generated payloads
//! Uses Apache Arrow object_store crate

use bytes::Bytes;
use object_store::{ObjectStore, local::LocalFileSystem, memory::InMemory, path::Path as StoragePath};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};
use crate::provider::Payload;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Invalid storage root: {0}")]
    InvalidRoot(String),

    #[error("Unreadable sidecar {key}: {reason}")]
    InvalidSidecar { key: String, reason: String },

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub size: usize,
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Local directory or in-memory store, per configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Memory => Ok(Self::in_memory()),
            StorageProvider::Local => {
                std::fs::create_dir_all(&config.root).map_err(|e| {
                    StorageError::InvalidRoot(format!("{}: {e}", config.root.display()))
                })?;
                let store = LocalFileSystem::new_with_prefix(&config.root)?;
                Ok(Self::new(Arc::new(store)))
            }
        }
    }

    /// Upload bytes to storage
    pub async fn upload(&self, key: &str, data: Bytes) -> Result<UploadMetadata> {
        let path = StoragePath::parse(key).map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        let size = data.len();

        self.store.put(&path, data.into()).await?;

        tracing::info!(key, size, "Uploaded to storage");

        Ok(UploadMetadata {
            key: key.to_string(),
            size,
        })
    }

    /// Write a payload as `<key>.<ext>` with a `<key>.json` metadata sidecar.
    ///
    /// Text is stored as UTF-8, images as raw bytes and file references as
    /// the URI string. The sidecar gets an `object_key` field naming the
    /// payload object.
    pub async fn put_payload(&self, key: &str, payload: &Payload, metadata: &Value) -> Result<UploadMetadata> {
        let body = match payload {
            Payload::Text { text } => Bytes::from(text.clone()),
            Payload::Image { data, .. } => data.clone(),
            Payload::ImageUri { uri, .. } => Bytes::from(uri.clone()),
        };

        let object_key = format!("{key}.{}", payload.extension());
        let uploaded = self.upload(&object_key, body).await?;

        let mut sidecar = metadata.clone();
        if let Value::Object(fields) = &mut sidecar {
            fields.insert("object_key".into(), Value::String(object_key.clone()));
        }
        let sidecar = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        self.upload(&format!("{key}.json"), Bytes::from(sidecar)).await?;

        Ok(uploaded)
    }

    /// Download from storage
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = StoragePath::from(key);
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Payload object recorded by an earlier `put_payload` for `key`
    pub async fn stored_object(&self, key: &str) -> Result<Option<String>> {
        let sidecar_key = format!("{key}.json");
        if !self.exists(&sidecar_key).await? {
            return Ok(None);
        }

        let raw = self.download(&sidecar_key).await?;
        let sidecar: Value = serde_json::from_slice(&raw).map_err(|e| StorageError::InvalidSidecar {
            key: sidecar_key.clone(),
            reason: e.to_string(),
        })?;

        let Some(object_key) = sidecar.get("object_key").and_then(Value::as_str) else {
            return Ok(None);
        };
        // A sidecar whose payload went missing does not count as stored.
        if !self.exists(object_key).await? {
            return Ok(None);
        }
        Ok(Some(object_key.to_string()))
    }
}
