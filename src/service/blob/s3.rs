//! Amazon S3 implementation of the blob store.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::{
    Client,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
};
use tracing::{debug, instrument};

use crate::base::{config::Config, error::DiagnosisError};

use super::{BlobClient, GenericBlobClient};

// Extra methods on `BlobClient` applied by the s3 implementation.

impl BlobClient {
    /// Creates a blob client for the configured S3 bucket.
    pub fn s3(config: &Config, sdk_config: &SdkConfig) -> Self {
        let client = S3BlobClient::new(config, sdk_config);
        Self::new(Arc::new(client), config)
    }
}

// Specific implementations.

/// S3 blob client implementation.
#[derive(Clone)]
pub struct S3BlobClient {
    client: Client,
    bucket: String,
    region: String,
}

impl S3BlobClient {
    /// Create a new S3 blob client.
    #[instrument(name = "S3BlobClient::new", skip_all)]
    pub fn new(config: &Config, sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
            bucket: config.s3_bucket_name.clone(),
            region: config.aws_region.clone(),
        }
    }
}

#[async_trait]
impl GenericBlobClient for S3BlobClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn region(&self) -> &str {
        &self.region
    }

    #[instrument(name = "S3BlobClient::exists", skip(self))]
    async fn exists(&self, key: &str) -> Result<bool, DiagnosisError> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(storage_error("head_object", &err)),
        }
    }

    #[instrument(name = "S3BlobClient::put_object", skip(self, bytes, metadata))]
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: Option<String>, metadata: &HashMap<String, String>) -> Result<(), DiagnosisError> {
        debug!("Uploading {} bytes to s3://{}/{key}", bytes.len(), self.bucket);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .set_content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|err| storage_error("put_object", &err))?;

        Ok(())
    }

    #[instrument(name = "S3BlobClient::get_object", skip(self))]
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, DiagnosisError> {
        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(DiagnosisError::NotFound {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(storage_error("get_object", &err)),
        };

        // A body that breaks off mid-stream is worth another attempt.
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| DiagnosisError::storage(format!("S3 get_object body read failed: {err}"), true))?;

        Ok(body.into_bytes().to_vec())
    }

    #[instrument(name = "S3BlobClient::delete_object", skip(self))]
    async fn delete_object(&self, key: &str) -> Result<(), DiagnosisError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| storage_error("delete_object", &err))?;

        Ok(())
    }
}

/// Map an SDK failure to a storage error, flagging the ones worth retrying.
fn storage_error<E, R>(action: &str, err: &SdkError<E, R>) -> DiagnosisError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    DiagnosisError::storage(format!("S3 {action} failed: {}", DisplayErrorContext(err)), is_transient(err))
}

fn is_transient<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        _ => matches!(err.code(), Some("SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout" | "Throttling")),
    }
}
