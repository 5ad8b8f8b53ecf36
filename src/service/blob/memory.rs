//! In-memory blob store, for tests and offline runs.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::base::{config::Config, error::DiagnosisError};

use super::{BlobClient, GenericBlobClient};

// Extra methods on `BlobClient` applied by the memory implementation.

impl BlobClient {
    /// Creates a blob client backed by process memory.
    pub fn memory(config: &Config) -> Self {
        let client = MemoryBlobClient::new(&config.s3_bucket_name, &config.aws_region);
        Self::new(Arc::new(client), config)
    }
}

/// A stored object, with the details a real store would keep alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Memory blob client implementation.
#[derive(Debug, Clone)]
pub struct MemoryBlobClient {
    bucket: String,
    region: String,
    objects: Arc<RwLock<HashMap<String, MemoryObject>>>,
}

impl MemoryBlobClient {
    pub fn new(bucket: &str, region: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            objects: Arc::default(),
        }
    }

    /// Number of objects currently stored.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// A copy of the object under `key`, if any.
    pub async fn object(&self, key: &str) -> Option<MemoryObject> {
        self.objects.read().await.get(key).cloned()
    }
}

#[async_trait]
impl GenericBlobClient for MemoryBlobClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn exists(&self, key: &str) -> Result<bool, DiagnosisError> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn put_object(&self, key: &str, bytes: &[u8], content_type: Option<String>, metadata: &HashMap<String, String>) -> Result<(), DiagnosisError> {
        debug!("Writing {} bytes to memory://{}/{key}", bytes.len(), self.bucket);

        let object = MemoryObject {
            bytes: bytes.to_vec(),
            content_type,
            metadata: metadata.clone(),
        };

        self.objects.write().await.insert(key.to_string(), object);

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, DiagnosisError> {
        self.objects.read().await.get(key).map(|o| o.bytes.clone()).ok_or_else(|| DiagnosisError::NotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), DiagnosisError> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
