//! Storage collaborator trait.
//!
//! The application implements `UploadStorage` on top of its transport
//! (HTTP, RPC, local disk). Keeping the engine behind a trait keeps it
//! transport-agnostic and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use quire_protocol::messages::{
    ChunkAck, ExistsResponse, FinalizeRequest, FinalizeResponse, UploadChunkRequest,
};

use crate::error::StorageError;

/// Boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Remote store that holds chunks and finalized objects.
pub trait UploadStorage: Send + Sync {
    /// Looks up a finalized object by content hash.
    fn exists_by_hash<'a>(&'a self, content_hash: &'a str) -> StorageFuture<'a, ExistsResponse>;

    /// Returns the chunk indices already stored for `session_id`.
    fn list_uploaded_chunks<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, Vec<u32>>;

    /// Stores one chunk.
    fn upload_chunk(&self, request: UploadChunkRequest) -> StorageFuture<'_, ChunkAck>;

    /// Assembles the session's chunks into the final object.
    fn finalize(&self, request: FinalizeRequest) -> StorageFuture<'_, FinalizeResponse>;

    /// Drops a session and its stored chunks.
    fn cancel<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, ()>;
}
