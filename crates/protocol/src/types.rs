use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "byte range start must not exceed end");
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Idle,
    Hashing,
    CheckingExistence,
    FetchingResumeState,
    Uploading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    /// Returns `true` while a background phase is running.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UploadStatus::Hashing
                | UploadStatus::CheckingExistence
                | UploadStatus::FetchingResumeState
                | UploadStatus::Uploading
        )
    }

    /// Returns `true` for states that end an attempt for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Cancelled)
    }
}

/// Progress of the transfer phase, as reported to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgressInfo {
    pub session_id: String,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub chunks_uploaded: u32,
    pub total_chunks: u32,
    /// Whole-number percentage (0-100), never decreasing within an attempt.
    pub percent: u8,
    pub speed_label: String,
    pub eta_label: String,
}

/// Read-only view of a session's public fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub progress_percent: u8,
    pub hash_progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub can_resume: bool,
    pub chunks_uploaded: u32,
}
