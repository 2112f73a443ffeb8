use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::SelectedFile;

const FALLBACK_FILE_NAME: &str = "upload.bin";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Picked(SelectedFile),
    Cancelled,
}

/// Source of a user-chosen file. A dismissed dialog is `Cancelled`, not an error.
#[async_trait]
pub trait FilePicker: Send + Sync {
    async fn request(&self) -> Result<PickOutcome>;
}

/// Picker backed by a path given up front, e.g. on the command line.
pub struct PathFilePicker {
    path: Option<PathBuf>,
}

impl PathFilePicker {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FilePicker for PathFilePicker {
    async fn request(&self) -> Result<PickOutcome> {
        let Some(path) = &self.path else {
            return Ok(PickOutcome::Cancelled);
        };
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(FALLBACK_FILE_NAME)
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_MIME_TYPE);
        Ok(PickOutcome::Picked(SelectedFile::new(name, mime_type, bytes)))
    }
}
