//! Chunked transfer building blocks: deterministic partitioning, blob
//! sources, background content hashing and throughput estimation.

mod chunk;
mod hash;
mod progress;
mod source;
mod validation;

pub use chunk::{Chunk, ChunkStatus, ChunkTracker, Dispatch, chunk_count, partition};
pub use hash::{
    HashFailure, HashMessage, HashOptions, HashPipeline, HashProgress, checksum_bytes,
    compute_hash,
};
pub use progress::{
    Eta, MAX_SPEED_SAMPLES, SPEED_UPDATE_INTERVAL, SPEED_WINDOW, SpeedCallback, SpeedEstimator,
    SpeedReport, format_eta, format_speed, percent_of,
};
pub use source::{BlobSource, FileBlob, MemoryBlob};
pub use validation::{validate_file, validate_storage_key};

/// Default transfer chunk size: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Default hashing slice size: 1 MiB.
///
/// Independent of the transfer chunk size.
pub const DEFAULT_HASH_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("range {start}..{end} is outside a {size}-byte blob")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}
