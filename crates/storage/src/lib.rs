use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use shared::{
    domain::{BucketName, SelectedFile, StorageKey, TransferProgress},
    protocol::{ListObjectsRequest, ListedObject, StorageErrorBody, UploadObjectResponse},
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub mod progress;

pub use progress::{progress_body, progress_channel, ProgressSender, ProgressStream};

use progress::DEFAULT_CHUNK_BYTES;

const STORAGE_API_PREFIX: &str = "storage/v1/object";
const CONFLICT_STATUS: u16 = 409;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Cache lifetime in seconds, sent as `cache-control: max-age=<n>`.
    pub cache_control: String,
    pub upsert: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            cache_control: "3600".into(),
            upsert: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: StorageKey,
    /// Bucket-qualified path reported by the backend.
    pub path: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object '{key}' already exists: {message}")]
    ObjectConflict { key: StorageKey, message: String },
    #[error("storage backend rejected the request ({status}): {message}")]
    Backend { status: u16, message: String },
    #[error("storage request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Single-shot upload of the whole file under `key`. Progress updates are
    /// pushed to `progress` while the body streams; the sender is dropped
    /// when the call returns.
    async fn upload_object(
        &self,
        key: &StorageKey,
        file: &SelectedFile,
        options: &UploadOptions,
        progress: ProgressSender,
    ) -> Result<StoredObject, StorageError>;

    async fn list_objects(
        &self,
        request: &ListObjectsRequest,
    ) -> Result<Vec<ListedObject>, StorageError>;

    fn public_url(&self, name: &str) -> String;
}

/// Object store speaking the hosted storage REST API.
pub struct HttpObjectStore {
    http: Client,
    base_url: Url,
    api_key: String,
    bucket: BucketName,
    chunk_bytes: usize,
}

impl HttpObjectStore {
    pub fn new(
        storage_url: &str,
        api_key: impl Into<String>,
        bucket: BucketName,
    ) -> Result<Self, StorageError> {
        let parsed = Url::parse(storage_url.trim())
            .map_err(|e| StorageError::InvalidConfig(format!("storage url '{storage_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StorageError::InvalidConfig(format!(
                "storage url '{storage_url}' must use http or https"
            )));
        }
        if bucket.as_str().trim().is_empty() {
            return Err(StorageError::InvalidConfig("bucket name is empty".into()));
        }

        Ok(Self {
            http: Client::new(),
            base_url: parsed,
            api_key: api_key.into(),
            bucket,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        })
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    pub fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    /// API URL below the storage prefix. Every segment is percent-encoded,
    /// so keys containing `#`, `?` or `%` address the object verbatim.
    fn api_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(STORAGE_API_PREFIX.split('/'))
                .extend(segments);
        }
        url
    }

    fn object_url(&self, key: &StorageKey) -> Url {
        self.api_url([self.bucket.as_str(), key.as_str()])
    }

    fn list_url(&self) -> Url {
        self.api_url(["list", self.bucket.as_str()])
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload_object(
        &self,
        key: &StorageKey,
        file: &SelectedFile,
        options: &UploadOptions,
        progress: ProgressSender,
    ) -> Result<StoredObject, StorageError> {
        let _ = progress.send(TransferProgress::new(0, file.size_bytes));
        let body = progress_body(file.content.clone(), self.chunk_bytes, progress);

        debug!(%key, bucket = %self.bucket, size_bytes = file.size_bytes, "uploading object");
        let response = self
            .http
            .post(self.object_url(key))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header(
                header::CACHE_CONTROL,
                format!("max-age={}", options.cache_control),
            )
            .header("x-upsert", options.upsert.to_string())
            .header(header::CONTENT_TYPE, &file.mime_type)
            .header(header::CONTENT_LENGTH, file.size_bytes)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(Some(key), response).await);
        }

        let stored: UploadObjectResponse = response.json().await?;
        info!(%key, path = %stored.key, "object stored");
        Ok(StoredObject {
            key: key.clone(),
            path: stored.key,
        })
    }

    async fn list_objects(
        &self,
        request: &ListObjectsRequest,
    ) -> Result<Vec<ListedObject>, StorageError> {
        let response = self
            .http
            .post(self.list_url())
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(None, response).await);
        }

        Ok(response.json().await?)
    }

    fn public_url(&self, name: &str) -> String {
        let object_path = name.split('/').filter(|segment| !segment.is_empty());
        self.api_url(["public", self.bucket.as_str()].into_iter().chain(object_path))
            .to_string()
    }
}

async fn backend_error(key: Option<&StorageKey>, response: Response) -> StorageError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: StorageErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body.describe().unwrap_or_else(|| {
        if text.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            text.clone()
        }
    });
    let effective_status = body.status().unwrap_or(status.as_u16());

    match key {
        Some(key)
            if effective_status == CONFLICT_STATUS || status == StatusCode::CONFLICT =>
        {
            StorageError::ObjectConflict {
                key: key.clone(),
                message,
            }
        }
        _ => StorageError::Backend {
            status: effective_status,
            message,
        },
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
