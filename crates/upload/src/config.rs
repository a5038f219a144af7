//! Upload session configuration.
//!
//! Durations are stored in milliseconds so the struct maps directly onto
//! TOML/JSON config files; every field has its own default.

use std::time::Duration;

use quire_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_HASH_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Tuning for one upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Transfer granularity in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Hashing granularity in bytes, independent of `chunk_size`.
    #[serde(default = "default_hash_chunk_size")]
    pub hash_chunk_size: u64,

    /// Retries per chunk after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before each retry.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Largest accepted file in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Simultaneous in-flight chunk transfers.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Start uploading as soon as a file is selected.
    #[serde(default)]
    pub auto_upload: bool,

    /// Wall-clock limit of the hash phase.
    #[serde(default = "default_hash_timeout_ms")]
    pub hash_timeout_ms: u64,

    /// Wall-clock limit of the transfer phase.
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_hash_chunk_size() -> u64 {
    DEFAULT_HASH_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_concurrency() -> usize {
    3
}

fn default_hash_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_upload_timeout_ms() -> u64 {
    30 * 60 * 1000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            hash_chunk_size: default_hash_chunk_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_file_size: default_max_file_size(),
            max_concurrency: default_max_concurrency(),
            auto_upload: false,
            hash_timeout_ms: default_hash_timeout_ms(),
            upload_timeout_ms: default_upload_timeout_ms(),
        }
    }
}

impl UploadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn hash_timeout(&self) -> Duration {
        Duration::from_millis(self.hash_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 || self.hash_chunk_size == 0 {
            return Err(UploadError::InvalidConfig(
                "chunk sizes must be > 0".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(UploadError::InvalidConfig(
                "max_concurrency must be >= 1".to_string(),
            ));
        }
        if self.hash_timeout_ms == 0 || self.upload_timeout_ms == 0 {
            return Err(UploadError::InvalidConfig(
                "timeouts must be > 0".to_string(),
            ));
        }
        if self.upload_timeout_ms < self.hash_timeout_ms {
            return Err(UploadError::InvalidConfig(
                "upload_timeout_ms must be >= hash_timeout_ms".to_string(),
            ));
        }
        if self.max_file_size / self.chunk_size >= u64::from(u32::MAX) {
            return Err(UploadError::InvalidConfig(
                "max_file_size would need more than u32::MAX chunks".to_string(),
            ));
        }
        Ok(())
    }
}
