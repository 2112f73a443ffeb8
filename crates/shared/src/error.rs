use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// User input was wrong; the user corrects it and nothing is corrupted.
    Validation,
    /// The relay target is missing; reloading configuration recovers.
    Configuration,
    /// A storage or relay call failed; surfaced verbatim, never retried.
    Transport,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("invalid file type '{mime_type}': please choose a video file")]
    InvalidFileType { mime_type: String },
    #[error("no video selected: please choose a video first")]
    NoFileSelected,
    #[error("an upload is already in progress")]
    UploadInProgress,
    #[error("relay configuration unavailable: {0}")]
    ConfigurationUnavailable(String),
    #[error("storage upload failed: {0}")]
    StorageUploadFailed(String),
    #[error("relay upload failed: {0}")]
    RelayFailed(String),
    #[error("unexpected upload error: {0}")]
    UnknownError(String),
}

impl UploadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidFileType { .. } | Self::NoFileSelected | Self::UploadInProgress => {
                ErrorCategory::Validation
            }
            Self::ConfigurationUnavailable(_) => ErrorCategory::Configuration,
            Self::StorageUploadFailed(_) | Self::RelayFailed(_) => ErrorCategory::Transport,
            Self::UnknownError(_) => ErrorCategory::Unknown,
        }
    }

    /// Short title used for notices.
    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidFileType { .. } => "Invalid file type",
            Self::NoFileSelected => "No video selected",
            Self::UploadInProgress => "Upload in progress",
            Self::ConfigurationUnavailable(_) => "Relay configuration error",
            Self::StorageUploadFailed(_) | Self::RelayFailed(_) | Self::UnknownError(_) => {
                "Upload failed"
            }
        }
    }
}
