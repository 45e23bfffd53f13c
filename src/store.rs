use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage as gcs;
use google_cloud_storage::client::{Storage, StorageControl};

use crate::error::AppError;

/// Per-call ceiling on bucket operations. The SDK retries internally; this
/// bounds how long a single request handler can hang on storage.
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Storage seam for the gallery and the upload pipeline. One production
/// implementation talks to the bucket; tests swap in an in-memory map.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object key in the bucket. Pure read, no housekeeping.
    async fn list(&self) -> Result<Vec<String>, AppError>;

    async fn read_bytes(&self, key: &str) -> Result<Vec<u8>, AppError>;

    async fn read_text(&self, key: &str) -> Result<String, AppError>;

    /// Overwrites silently if the key already exists. Failures propagate to
    /// the caller as typed errors.
    async fn write(&self, key: &str, content: Bytes, content_type: &str) -> Result<(), AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// Bucket-backed store using the official Cloud Storage SDK. Authenticates
/// through Application Default Credentials.
pub struct GcsStore {
    storage: Storage,
    control: StorageControl,
    /// Full resource name, `projects/_/buckets/{bucket}`.
    bucket: String,
}

impl GcsStore {
    pub async fn connect(bucket_name: &str) -> anyhow::Result<Self> {
        let storage = Storage::builder().build().await?;
        let control = StorageControl::builder().build().await?;
        Ok(GcsStore {
            storage,
            control,
            bucket: format!("projects/_/buckets/{bucket_name}"),
        })
    }
}

fn map_gcs_err(key: &str, err: gcs::Error) -> AppError {
    if err.http_status_code() == Some(404) {
        AppError::NotFound(key.to_owned())
    } else {
        AppError::TransientStore(err.to_string())
    }
}

async fn bounded<T>(
    fut: impl std::future::Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    tokio::time::timeout(STORE_TIMEOUT, fut)
        .await
        .map_err(|_| AppError::TransientStore("storage request timed out".to_owned()))?
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn list(&self) -> Result<Vec<String>, AppError> {
        bounded(async {
            let mut keys = Vec::new();
            let mut page_token = String::new();
            loop {
                let response = self
                    .control
                    .list_objects()
                    .set_parent(&self.bucket)
                    .set_page_token(&page_token)
                    .send()
                    .await
                    .map_err(|e| AppError::TransientStore(e.to_string()))?;
                keys.extend(response.objects.into_iter().map(|o| o.name));
                if response.next_page_token.is_empty() {
                    break;
                }
                page_token = response.next_page_token;
            }
            Ok(keys)
        })
        .await
    }

    async fn read_bytes(&self, key: &str) -> Result<Vec<u8>, AppError> {
        bounded(async {
            let mut reader = self
                .storage
                .read_object(&self.bucket, key)
                .send()
                .await
                .map_err(|e| map_gcs_err(key, e))?;
            let mut contents = Vec::new();
            while let Some(chunk) = reader
                .next()
                .await
                .transpose()
                .map_err(|e| map_gcs_err(key, e))?
            {
                contents.extend_from_slice(&chunk);
            }
            Ok(contents)
        })
        .await
    }

    async fn read_text(&self, key: &str) -> Result<String, AppError> {
        let bytes = self.read_bytes(key).await?;
        String::from_utf8(bytes)
            .map_err(|_| AppError::TransientStore(format!("object {key} is not valid utf-8")))
    }

    async fn write(&self, key: &str, content: Bytes, content_type: &str) -> Result<(), AppError> {
        bounded(async {
            self.storage
                .write_object(&self.bucket, key, content)
                .set_content_type(content_type)
                .send_buffered()
                .await
                .map_err(|e| AppError::TransientStore(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        bounded(async {
            self.control
                .delete_object()
                .set_bucket(&self.bucket)
                .set_object(key)
                .send()
                .await
                .map_err(|e| map_gcs_err(key, e))?;
            Ok(())
        })
        .await
    }
}
