use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use reqwest::{
    multipart::{Form, Part},
    Body, Client,
};
use shared::{
    domain::{RelayTarget, SelectedFile},
    protocol::RelayResponse,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

const RELAY_UPLOAD_PATH: &str = "upload";
const DEFAULT_SCHEME: &str = "https";
const UNKNOWN_RELAY_ERROR: &str = "Unknown error occurred";
const FILE_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay endpoint returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Rejected(String),
    #[error("relay response could not be decoded: {0}")]
    Decode(String),
    #[error("relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid relay endpoint '{0}'")]
    InvalidEndpoint(String),
}

#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Forwards the file together with the target's credentials.
    async fn relay(&self, target: &RelayTarget, file: &SelectedFile) -> Result<(), RelayError>;
}

/// Upload URL for a configured relay host. Bare hosts are reached over
/// https; a value that already carries a scheme is used as the base verbatim.
pub fn relay_endpoint(server_url: &str) -> Result<Url, RelayError> {
    let trimmed = server_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RelayError::InvalidEndpoint(server_url.to_string()));
    }

    let base = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{DEFAULT_SCHEME}://{trimmed}")
    };

    let url = Url::parse(&format!("{base}/{RELAY_UPLOAD_PATH}"))
        .map_err(|_| RelayError::InvalidEndpoint(server_url.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(RelayError::InvalidEndpoint(server_url.to_string()));
    }
    Ok(url)
}

/// Body chunks read from the shared file content. Only one chunk is held
/// outside the selection at a time.
fn file_chunks(
    content: Arc<Vec<u8>>,
    chunk_bytes: usize,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + Sync + 'static {
    let chunk_bytes = chunk_bytes.max(1);
    futures::stream::unfold(0usize, move |offset| {
        let content = content.clone();
        async move {
            if offset >= content.len() {
                return None;
            }
            let end = (offset + chunk_bytes).min(content.len());
            Some((Ok(content[offset..end].to_vec()), end))
        }
    })
}

/// Multipart `file` field streamed from the selection without copying it.
fn file_part(file: &SelectedFile, chunk_bytes: usize) -> Result<Part, RelayError> {
    let body = Body::wrap_stream(file_chunks(file.content.clone(), chunk_bytes));
    Ok(Part::stream_with_length(body, file.content.len() as u64)
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)?)
}

pub struct HttpRelayClient {
    http: Client,
    chunk_bytes: usize,
}

impl HttpRelayClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            chunk_bytes: FILE_CHUNK_BYTES,
        }
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }
}

impl Default for HttpRelayClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn relay(&self, target: &RelayTarget, file: &SelectedFile) -> Result<(), RelayError> {
        let endpoint = relay_endpoint(&target.server_url)?;

        let form = Form::new()
            .part("file", file_part(file, self.chunk_bytes)?)
            .text("api_id", target.api_id.clone())
            .text("api_hash", target.api_hash.clone());

        debug!(%endpoint, file = %file.name, "relaying file");
        let response = self.http.post(endpoint.clone()).multipart(form).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<RelayResponse>(&text)
                .ok()
                .and_then(|body| body.error)
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| {
                    if text.trim().is_empty() {
                        status.canonical_reason().unwrap_or("no response body").to_string()
                    } else {
                        text.trim().to_string()
                    }
                });
            return Err(RelayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: RelayResponse =
            serde_json::from_str(&text).map_err(|e| RelayError::Decode(e.to_string()))?;
        if !body.ok {
            return Err(RelayError::Rejected(
                body.error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| UNKNOWN_RELAY_ERROR.to_string()),
            ));
        }

        info!(%endpoint, file = %file.name, "relay accepted file");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
