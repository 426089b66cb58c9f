use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;

/// Trait for payload storage operations (S3-compatible).
///
/// Abstracted as a trait so tests can use an in-memory store or a mock
/// without a real S3 instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store a new payload for `document_id` and return its key.
    async fn save(
        &self,
        content: Vec<u8>,
        file_name: &str,
        document_id: Uuid,
        owner_id: Uuid,
    ) -> Result<String, AppError>;

    /// Duplicate the payload at `key` under the new owner and document.
    /// Returns the key of the copy.
    async fn copy(
        &self,
        key: &str,
        file_name: &str,
        new_document_id: Uuid,
        new_owner_id: Uuid,
    ) -> Result<String, AppError>;

    /// Remove a payload. Returns `false` if there was nothing to remove.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Retrieve a payload. Returns `None` if the object doesn't exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
}

/// Build the storage key for a document payload: `{owner}/{document}{.ext}`.
///
/// The extension of the uploaded file name is kept (lower-cased) so the
/// stored object remains recognizable; everything else comes from ids.
pub fn payload_key(file_name: &str, document_id: Uuid, owner_id: Uuid) -> String {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    format!("{owner_id}/{document_id}{extension}")
}

/// Infer the MIME type of an upload from its file name.
pub fn content_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// S3 implementation of StorageClient.
///
/// Only available when the `server` feature is enabled.
#[cfg(feature = "server")]
pub struct S3StorageClient {
    client: aws_sdk_s3::Client,
    bucket: String,
}

#[cfg(feature = "server")]
impl S3StorageClient {
    /// Create a new S3 storage client.
    ///
    /// Credentials and region come from the standard AWS environment.
    /// `endpoint` overrides the service URL (MinIO, LocalStack).
    pub async fn connect(bucket: String, endpoint: Option<&str>) -> Self {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(endpoint) = endpoint {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        let sdk_config = config_loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket,
        }
    }

    /// Create with explicit values (useful for testing / DI).
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(AppError::Storage(format!(
                        "Failed to inspect object '{}': {}",
                        key, service_err
                    )))
                }
            }
        }
    }
}

#[cfg(feature = "server")]
#[async_trait]
impl StorageClient for S3StorageClient {
    async fn save(
        &self,
        content: Vec<u8>,
        file_name: &str,
        document_id: Uuid,
        owner_id: Uuid,
    ) -> Result<String, AppError> {
        let key = payload_key(file_name, document_id, owner_id);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type_for(file_name))
            .body(content.into())
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to put object '{}': {}", key, e)))?;

        Ok(key)
    }

    async fn copy(
        &self,
        key: &str,
        file_name: &str,
        new_document_id: Uuid,
        new_owner_id: Uuid,
    ) -> Result<String, AppError> {
        let new_key = payload_key(file_name, new_document_id, new_owner_id);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, key))
            .key(&new_key)
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "Failed to copy object '{}' to '{}': {}",
                    key, new_key, e
                ))
            })?;

        Ok(new_key)
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        // S3 deletes are silent about missing keys; look first so callers
        // can tell a removal from a no-op.
        if !self.exists(key).await? {
            return Ok(false);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to delete object '{}': {}", key, e)))?;

        Ok(true)
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::Storage(format!("Failed to read body: {}", e)))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(AppError::Storage(format!(
                        "Failed to get object '{}': {}",
                        key, service_err
                    )))
                }
            }
        }
    }
}
