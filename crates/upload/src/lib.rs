//! Resumable, content-addressed chunked uploads.
//!
//! This crate holds the upload **business logic**. It has no transport
//! dependencies: the application provides an [`UploadStorage`]
//! implementation that bridges to its actual storage service.
//!
//! # Pipeline
//!
//! 1. **Hash**: SHA-256 of the whole file, computed off the async runtime
//! 2. **Dedup**: ask the storage whether the content is already stored
//! 3. **Resume**: fetch the chunk indices stored under the session id
//! 4. **Upload**: send the missing chunks with bounded concurrency
//! 5. **Finalize**: assemble the chunks into the final object

pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod session;
pub mod storage;
pub mod types;

// Re-export primary types for convenience.
pub use config::UploadConfig;
pub use coordinator::{ChunkUploadCoordinator, CoordinatorEvent, UploadRequest, upload_chunks};
pub use error::{StorageError, UploadError};
pub use memory::InMemoryStorage;
pub use session::UploadSession;
pub use storage::{StorageFuture, UploadStorage};
pub use types::SessionCallbacks;
