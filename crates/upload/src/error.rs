//! Upload error taxonomy.

use std::time::Duration;

use quire_protocol::UploadStatus;
use quire_transfer::{HashFailure, TransferError};

/// Errors reported by a storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage rejected request: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors produced by upload sessions and the chunk coordinator.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("hashing failed: {0}")]
    Hash(HashFailure),

    #[error("existence check failed: {0}")]
    ExistenceCheck(StorageError),

    #[error("fetching resume state failed: {0}")]
    ResumeState(StorageError),

    #[error("chunk {index} failed after {attempts} attempts: {reason}")]
    ChunkUpload {
        index: u32,
        attempts: u32,
        reason: String,
    },

    #[error("finalize failed: {0}")]
    Finalize(StorageError),

    #[error("upload timed out after {0:?}")]
    UploadTimeout(Duration),

    #[error("upload worker failed: {0}")]
    Worker(String),

    #[error("cancelled by user")]
    CancelledByUser,

    #[error("{operation} is not allowed while {status:?}")]
    InvalidState {
        operation: &'static str,
        status: UploadStatus,
    },
}

impl From<HashFailure> for UploadError {
    fn from(failure: HashFailure) -> Self {
        match failure {
            HashFailure::Cancelled => UploadError::CancelledByUser,
            other => UploadError::Hash(other),
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidFile(reason) => UploadError::Validation(reason),
            other => UploadError::Worker(other.to_string()),
        }
    }
}

impl UploadError {
    /// Returns `true` for user-initiated teardown, which is not reported as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, UploadError::CancelledByUser)
    }

    /// Whether chunks stored before this failure stay usable for a resume.
    pub fn keeps_uploaded_chunks(&self) -> bool {
        matches!(
            self,
            UploadError::ChunkUpload { .. }
                | UploadError::Finalize(_)
                | UploadError::UploadTimeout(_)
                | UploadError::Worker(_)
        )
    }

    /// One human-readable message per error kind.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Validation(reason) => {
                format!("The selected file cannot be uploaded: {reason}")
            }
            UploadError::InvalidConfig(reason) => format!("Upload settings are invalid: {reason}"),
            UploadError::Hash(HashFailure::Timeout(_)) => {
                "Reading the file took too long. Please try again.".into()
            }
            UploadError::Hash(_) => "The file could not be read. Please try again.".into(),
            UploadError::ExistenceCheck(_) => {
                "The storage service could not be reached. Please try again.".into()
            }
            UploadError::ResumeState(_) => {
                "Saved upload progress could not be loaded. Please try again.".into()
            }
            UploadError::ChunkUpload { .. } => {
                "Part of the file failed to upload. You can resume the upload.".into()
            }
            UploadError::Finalize(_) => {
                "The storage service could not complete the upload. You can resume the upload."
                    .into()
            }
            UploadError::UploadTimeout(_) => "The upload took too long and was stopped.".into(),
            UploadError::Worker(_) => "The upload was interrupted by an internal error.".into(),
            UploadError::CancelledByUser => "Upload cancelled.".into(),
            UploadError::InvalidState { .. } => self.to_string(),
        }
    }
}
