//! Wire types shared between the upload engine, its storage collaborator
//! and the UI layer that renders progress.

pub mod messages;
pub mod types;

pub use types::{ByteRange, ChunkProgressInfo, SessionSnapshot, UploadStatus};
