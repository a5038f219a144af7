//! Whole-file content hashing on a blocking worker.
//!
//! The worker streams fixed-size slices into an incremental SHA-256 and
//! reports back over a channel; it shares nothing with the caller except
//! the cancellation token.

use std::sync::Arc;
use std::time::Duration;

use quire_protocol::ByteRange;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::progress::percent_of;
use crate::source::BlobSource;
use crate::DEFAULT_HASH_CHUNK_SIZE;

/// Default wall-clock limit for hashing one file.
const DEFAULT_HASH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Why hashing did not produce a digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashFailure {
    #[error("hashing timed out after {0:?}")]
    Timeout(Duration),

    #[error("hash worker failed: {0}")]
    Worker(String),

    #[error("hashing cancelled")]
    Cancelled,
}

/// Incremental hashing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashProgress {
    pub bytes_hashed: u64,
    pub total_bytes: u64,
    pub percent: u8,
}

/// Messages sent from the hash worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashMessage {
    Progress(HashProgress),
    Complete { hash: String },
    Failed { reason: String },
}

/// Tuning for [`compute_hash`].
#[derive(Debug, Clone, Copy)]
pub struct HashOptions {
    /// Bytes fed to the hasher per slice.
    pub slice_size: u64,
    pub timeout: Duration,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            slice_size: DEFAULT_HASH_CHUNK_SIZE,
            timeout: DEFAULT_HASH_TIMEOUT,
        }
    }
}

/// Handle to a running hash worker.
///
/// Dropping the handle cancels the worker; it stops before its next slice
/// and never reports again.
pub struct HashPipeline {
    rx: mpsc::Receiver<HashMessage>,
    cancel: CancellationToken,
}

impl HashPipeline {
    /// Starts hashing `source` on the blocking pool.
    ///
    /// The worker observes a child of `cancel`, so cancelling the parent
    /// also stops it.
    pub fn spawn(source: Arc<dyn BlobSource>, slice_size: u64, cancel: &CancellationToken) -> Self {
        assert!(slice_size > 0, "hash slice size must be > 0");
        let (tx, rx) = mpsc::channel(16);
        let cancel = cancel.child_token();
        let worker_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || hash_worker(source, slice_size, worker_cancel, tx));
        Self { rx, cancel }
    }

    /// Receives the next worker message. `None` once the worker has exited.
    pub async fn recv(&mut self) -> Option<HashMessage> {
        self.rx.recv().await
    }

    /// Stops the worker.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HashPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn hash_worker(
    source: Arc<dyn BlobSource>,
    slice_size: u64,
    cancel: CancellationToken,
    tx: mpsc::Sender<HashMessage>,
) {
    let total = source.size();
    let mut hasher = Sha256::new();
    let mut offset = 0u64;

    while offset < total {
        if cancel.is_cancelled() {
            return;
        }
        let end = (offset + slice_size).min(total);
        match source.read_range(ByteRange::new(offset, end)) {
            Ok(buf) => hasher.update(&buf),
            Err(e) => {
                let _ = tx.blocking_send(HashMessage::Failed {
                    reason: e.to_string(),
                });
                return;
            }
        }
        offset = end;

        let progress = HashProgress {
            bytes_hashed: offset,
            total_bytes: total,
            percent: percent_of(offset, total),
        };
        if tx.blocking_send(HashMessage::Progress(progress)).is_err() {
            return;
        }
    }

    if total == 0 {
        let progress = HashProgress {
            bytes_hashed: 0,
            total_bytes: 0,
            percent: 100,
        };
        if tx.blocking_send(HashMessage::Progress(progress)).is_err() {
            return;
        }
    }

    if cancel.is_cancelled() {
        return;
    }
    let _ = tx.blocking_send(HashMessage::Complete {
        hash: hex::encode(hasher.finalize()),
    });
}

/// Hashes `source` off the calling task, reporting progress after each slice.
///
/// Fails with [`HashFailure::Timeout`] when `options.timeout` elapses and
/// with [`HashFailure::Cancelled`] when `cancel` fires. In both cases the
/// worker is torn down and no partial digest is returned.
pub async fn compute_hash<F>(
    source: Arc<dyn BlobSource>,
    options: HashOptions,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<String, HashFailure>
where
    F: FnMut(HashProgress),
{
    let mut pipeline = HashPipeline::spawn(source, options.slice_size, cancel);
    let deadline = tokio::time::sleep(options.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HashFailure::Cancelled),
            _ = &mut deadline => return Err(HashFailure::Timeout(options.timeout)),
            msg = pipeline.recv() => match msg {
                Some(HashMessage::Progress(p)) => on_progress(p),
                Some(HashMessage::Complete { hash }) => return Ok(hash),
                Some(HashMessage::Failed { reason }) => return Err(HashFailure::Worker(reason)),
                None => {
                    return Err(HashFailure::Worker(
                        "hash worker exited without a result".into(),
                    ));
                }
            },
        }
    }
}
