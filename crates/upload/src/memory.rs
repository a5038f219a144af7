//! In-process storage collaborator.
//!
//! Keeps chunks and finalized objects in memory, verifies checksums and
//! content hashes like a real store would, and exposes counters and fault
//! injection for tests and demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quire_protocol::messages::{
    ChunkAck, ExistsResponse, FinalizeRequest, FinalizeResponse, UploadChunkRequest,
};
use quire_transfer::checksum_bytes;

use crate::error::StorageError;
use crate::storage::{StorageFuture, UploadStorage};

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, BTreeMap<u32, Vec<u8>>>,
    objects: HashMap<String, Vec<u8>>,
    /// Remaining injected failures per chunk index.
    chunk_failures: HashMap<u32, u32>,
    /// Successful `upload_chunk` calls, in completion order.
    upload_log: Vec<(String, u32)>,
    unavailable: bool,
}

/// Storage that lives entirely in memory.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<MemoryInner>,
    latency: Duration,
    upload_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a transfer ends or is aborted.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every chunk transfer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Public URL of the object with `content_hash`.
    pub fn object_url(content_hash: &str) -> String {
        format!("memory://objects/{content_hash}")
    }

    /// Makes the next `times` transfers of chunk `index` fail.
    pub fn fail_chunk(&self, index: u32, times: u32) {
        self.lock().chunk_failures.insert(index, times);
    }

    /// Makes every operation fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Stores a finalized object directly, as if uploaded earlier.
    pub fn insert_object(&self, data: Vec<u8>) -> String {
        let hash = checksum_bytes(&data);
        self.lock().objects.insert(hash.clone(), data);
        Self::object_url(&hash)
    }

    pub fn object(&self, content_hash: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(content_hash).cloned()
    }

    /// Chunk indices currently held for `session_id`.
    pub fn stored_chunks(&self, session_id: &str) -> Vec<u32> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|chunks| chunks.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Indices of successful transfers for `session_id`, in completion order.
    pub fn transferred(&self, session_id: &str) -> Vec<u32> {
        self.lock()
            .upload_log
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, index)| *index)
            .collect()
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `upload_chunk` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.lock().unavailable {
            Err(StorageError::Unavailable("in-memory storage is offline".into()))
        } else {
            Ok(())
        }
    }

    fn store_chunk(&self, request: UploadChunkRequest) -> Result<ChunkAck, StorageError> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(StorageError::Unavailable("in-memory storage is offline".into()));
        }
        if let Some(remaining) = inner.chunk_failures.get_mut(&request.index)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StorageError::Unavailable(format!(
                "injected failure for chunk {}",
                request.index
            )));
        }
        if request.payload.len() as u64 != request.range.len() {
            return Err(StorageError::Rejected(format!(
                "chunk {} carries {} bytes for a {}-byte range",
                request.index,
                request.payload.len(),
                request.range.len()
            )));
        }
        if !request.checksum.is_empty() && checksum_bytes(&request.payload) != request.checksum {
            return Err(StorageError::Rejected(format!(
                "checksum mismatch for chunk {}",
                request.index
            )));
        }

        let received_bytes = request.payload.len() as u64;
        inner
            .upload_log
            .push((request.session_id.clone(), request.index));
        inner
            .sessions
            .entry(request.session_id.clone())
            .or_default()
            .insert(request.index, request.payload);
        Ok(ChunkAck {
            session_id: request.session_id,
            index: request.index,
            received_bytes,
        })
    }

    fn assemble(&self, request: &FinalizeRequest) -> Result<FinalizeResponse, StorageError> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(StorageError::Unavailable("in-memory storage is offline".into()));
        }
        let chunks = inner
            .sessions
            .get(&request.session_id)
            .ok_or_else(|| StorageError::NotFound(format!("session {}", request.session_id)))?;

        let missing: Vec<u32> = (0..request.total_chunks)
            .filter(|i| !chunks.contains_key(i))
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::Rejected(format!(
                "missing chunks {missing:?}"
            )));
        }

        let data: Vec<u8> = chunks
            .range(..request.total_chunks)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect();
        if data.len() as u64 != request.file_size {
            return Err(StorageError::Rejected(format!(
                "assembled {} bytes, expected {}",
                data.len(),
                request.file_size
            )));
        }
        if checksum_bytes(&data) != request.content_hash {
            return Err(StorageError::Rejected("content hash mismatch".into()));
        }

        inner.sessions.remove(&request.session_id);
        inner.objects.insert(request.content_hash.clone(), data);
        Ok(FinalizeResponse {
            url: Self::object_url(&request.content_hash),
        })
    }
}

impl UploadStorage for InMemoryStorage {
    fn exists_by_hash<'a>(&'a self, content_hash: &'a str) -> StorageFuture<'a, ExistsResponse> {
        Box::pin(async move {
            self.check_available()?;
            let exists = self.lock().objects.contains_key(content_hash);
            Ok(ExistsResponse {
                exists,
                url: exists.then(|| Self::object_url(content_hash)),
            })
        })
    }

    fn list_uploaded_chunks<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, Vec<u32>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.stored_chunks(session_id))
        })
    }

    fn upload_chunk(&self, request: UploadChunkRequest) -> StorageFuture<'_, ChunkAck> {
        Box::pin(async move {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlightGuard(&self.in_flight);
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.store_chunk(request)
        })
    }

    fn finalize(&self, request: FinalizeRequest) -> StorageFuture<'_, FinalizeResponse> {
        Box::pin(async move {
            self.finalize_calls.fetch_add(1, Ordering::SeqCst);
            self.assemble(&request)
        })
    }

    fn cancel<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;
            self.lock().sessions.remove(session_id);
            Ok(())
        })
    }
}
