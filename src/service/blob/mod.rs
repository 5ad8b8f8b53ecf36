//! Blob store access for image submissions.
//!
//! The `GenericBlobClient` trait covers the raw object operations; `BlobClient`
//! layers key derivation, idempotent uploads, timeouts and retries on top, so
//! every backend behaves the same from the orchestrator's point of view.

pub mod memory;
pub mod s3;

use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        error::DiagnosisError,
        types::{ImageSubmission, StoredObjectRef},
    },
    service::retry::{RetryPolicy, call_with_retry},
};

// Traits.

/// Generic blob store trait that backends must implement.
///
/// Implementations address a single bucket, and report failures as
/// `DiagnosisError::Storage` (or `NotFound` for missing keys), flagging
/// throttling and network faults as transient.
#[async_trait]
pub trait GenericBlobClient: Send + Sync + 'static {
    /// The bucket this client writes to.
    fn bucket(&self) -> &str;

    /// The region the bucket lives in.
    fn region(&self) -> &str;

    /// Whether an object exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, DiagnosisError>;

    /// Write an object in one piece.
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: Option<String>, metadata: &HashMap<String, String>) -> Result<(), DiagnosisError>;

    /// Read an object back.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, DiagnosisError>;

    /// Remove an object. Removing a missing key succeeds.
    async fn delete_object(&self, key: &str) -> Result<(), DiagnosisError>;
}

// Structs.

/// Blob store client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct BlobClient {
    inner: Arc<dyn GenericBlobClient>,
    policy: RetryPolicy,
    prefix: String,
}

impl Deref for BlobClient {
    type Target = dyn GenericBlobClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl BlobClient {
    pub fn new(inner: Arc<dyn GenericBlobClient>, config: &Config) -> Self {
        Self {
            inner,
            policy: RetryPolicy::storage(config),
            prefix: config.upload_prefix.trim_matches('/').to_string(),
        }
    }

    fn object_ref(&self, key: String) -> StoredObjectRef {
        StoredObjectRef {
            bucket: self.bucket().to_string(),
            key,
            region: self.region().to_string(),
        }
    }

    /// Persist a submission, returning the reference to the stored object.
    ///
    /// With an idempotency key, the object key is deterministic: an existing
    /// object is returned as-is, and transient failures are retried. Without
    /// one, the write is attempted exactly once.
    #[instrument(name = "BlobClient::put", skip_all, fields(submission_id = %submission.id))]
    pub async fn put(&self, submission: &ImageSubmission) -> Result<StoredObjectRef, DiagnosisError> {
        let key = object_key(&self.prefix, submission);
        let metadata = object_metadata(submission);

        let idempotent = submission.idempotency_key.is_some();
        let policy = if idempotent { self.policy } else { self.policy.once() };

        let key_ref = &key;
        let metadata = &metadata;

        call_with_retry("Blob put", policy, storage_timeout, || async move {
            if idempotent && self.exists(key_ref).await? {
                info!("Object `{key_ref}` already exists, skipping upload.");
                return Ok(());
            }

            self.put_object(key_ref, &submission.bytes, submission.content_type.clone(), metadata).await
        })
        .await?;

        let object = self.object_ref(key);

        info!("Stored submission at {object}.");

        Ok(object)
    }

    /// Read a stored object back.
    #[instrument(name = "BlobClient::get", skip(self), fields(object = %object))]
    pub async fn get(&self, object: &StoredObjectRef) -> Result<Vec<u8>, DiagnosisError> {
        self.ensure_same_bucket(object)?;

        call_with_retry("Blob get", self.policy, storage_timeout, || self.get_object(&object.key)).await
    }

    /// Remove a stored object; used for explicit cleanup of orphans.
    #[instrument(name = "BlobClient::delete", skip(self), fields(object = %object))]
    pub async fn delete(&self, object: &StoredObjectRef) -> Result<(), DiagnosisError> {
        self.ensure_same_bucket(object)?;

        call_with_retry("Blob delete", self.policy, storage_timeout, || self.delete_object(&object.key)).await?;

        info!("Deleted {object}.");

        Ok(())
    }

    fn ensure_same_bucket(&self, object: &StoredObjectRef) -> Result<(), DiagnosisError> {
        if object.bucket != self.bucket() {
            return Err(DiagnosisError::storage(
                format!("Object {object} is not in the configured bucket `{}`.", self.bucket()),
                false,
            ));
        }

        Ok(())
    }
}

/// Error for a storage attempt that outlived its timeout.
fn storage_timeout(timeout: Duration) -> DiagnosisError {
    DiagnosisError::storage(format!("Storage call timed out after {timeout:?}."), true)
}

/// Derive the object key for a submission.
///
/// `<prefix>/<unique>-<file name>`, where `unique` is the idempotency key or a
/// fresh UUID.
pub fn object_key(prefix: &str, submission: &ImageSubmission) -> String {
    let unique = match &submission.idempotency_key {
        Some(key) => sanitize(key),
        None => uuid::Uuid::new_v4().to_string(),
    };

    let file_name = submission
        .file_name
        .as_deref()
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(sanitize)
        .filter(|name| !name.is_empty());

    let name = match file_name {
        Some(file_name) => format!("{unique}-{file_name}"),
        None => unique,
    };

    if prefix.is_empty() { name } else { format!("{prefix}/{name}") }
}

fn sanitize(value: &str) -> String {
    value.replace("..", "_").replace(['/', '\\'], "_")
}

fn object_metadata(submission: &ImageSubmission) -> HashMap<String, String> {
    let mut metadata = HashMap::from([
        ("submission-id".to_string(), submission.id.clone()),
        ("captured-at".to_string(), submission.captured_at.to_rfc3339()),
    ]);

    if let Some(source) = &submission.source {
        metadata.insert("source".to_string(), source.clone());
    }

    if let Some(location) = &submission.location {
        metadata.insert("location".to_string(), location.clone());
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_with_idempotency_key_is_stable() {
        let submission = ImageSubmission::new(vec![1]).with_file_name("photos/leaf.jpg").with_idempotency_key("batch-7");

        assert_eq!(object_key("uploads", &submission), "uploads/batch-7-leaf.jpg");
        assert_eq!(object_key("uploads", &submission), object_key("uploads", &submission));
    }

    #[test]
    fn test_object_key_without_idempotency_key_is_unique() {
        let submission = ImageSubmission::new(vec![1]).with_file_name("leaf.jpg");

        let first = object_key("uploads", &submission);
        let second = object_key("uploads", &submission);

        assert_ne!(first, second);
        assert!(first.starts_with("uploads/"));
        assert!(first.ends_with("-leaf.jpg"));
    }

    #[test]
    fn test_object_key_sanitizes_names() {
        let submission = ImageSubmission::new(vec![1]).with_file_name("..\\..\\etc..png").with_idempotency_key("a/b");
        assert_eq!(object_key("uploads", &submission), "uploads/a_b-etc_png");

        let submission = ImageSubmission::new(vec![1]).with_idempotency_key("k1");
        assert_eq!(object_key("", &submission), "k1");
    }

    #[test]
    fn test_object_metadata_carries_submission_details() {
        let submission = ImageSubmission::new(vec![1]).with_source("field-cam-3");
        let metadata = object_metadata(&submission);

        assert_eq!(metadata.get("submission-id"), Some(&submission.id));
        assert_eq!(metadata.get("source").map(String::as_str), Some("field-cam-3"));
        assert!(!metadata.contains_key("location"));
    }
}
