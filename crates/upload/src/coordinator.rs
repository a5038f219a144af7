//! Bounded-concurrency chunk transfer.
//!
//! The coordinator runs as its own tokio task. It keeps up to
//! `max_concurrency` chunk transfers in a `JoinSet`, holds failed chunks
//! back as `RetryPending` for a fixed delay and calls `finalize` once every
//! chunk is stored. Everything it learns is reported as
//! [`CoordinatorEvent`]s over a channel.

use std::sync::Arc;
use std::time::Duration;

use quire_protocol::ByteRange;
use quire_protocol::messages::{FinalizeRequest, UploadChunkRequest};
use quire_transfer::{BlobSource, ChunkStatus, ChunkTracker, Dispatch, checksum_bytes};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::storage::UploadStorage;

/// Everything the coordinator needs to upload one file.
#[derive(Clone)]
pub struct UploadRequest {
    pub source: Arc<dyn BlobSource>,
    pub session_id: String,
    pub content_hash: String,
    pub file_name: String,
    /// Chunk indices the storage already holds.
    pub already_uploaded: Vec<u32>,
}

/// Events emitted by a running coordinator.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// Cumulative, file-scoped progress.
    Progress {
        bytes_uploaded: u64,
        total_bytes: u64,
        chunks_uploaded: u32,
        total_chunks: u32,
    },
    ChunkUploaded { index: u32 },
    /// A chunk failed and will be retried as `attempt` after the retry delay.
    ChunkRetry {
        index: u32,
        attempt: u32,
        reason: String,
    },
    Completed { url: String },
    Failed(UploadError),
}

/// Settings the run loop copies out of [`UploadConfig`].
#[derive(Debug, Clone, Copy)]
struct Limits {
    chunk_size: u64,
    max_concurrency: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl From<&UploadConfig> for Limits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_concurrency: config.max_concurrency.max(1),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Handle to a running upload.
///
/// Dropping the handle aborts the task together with every in-flight
/// transfer; no events arrive afterwards.
pub struct ChunkUploadCoordinator {
    events: mpsc::Receiver<CoordinatorEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChunkUploadCoordinator {
    /// Starts uploading `request.source` in the background.
    ///
    /// The task observes a child of `cancel`.
    pub fn spawn(
        storage: Arc<dyn UploadStorage>,
        config: &UploadConfig,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> Self {
        let (tx, events) = mpsc::channel(64);
        let cancel = cancel.child_token();
        let limits = Limits::from(config);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let session_id = request.session_id.clone();
                let event = match run(storage, limits, request, &cancel, &tx).await {
                    Ok(url) => {
                        info!(session = %session_id, url = %url, "upload finalized");
                        CoordinatorEvent::Completed { url }
                    }
                    Err(e) => {
                        if !e.is_cancellation() {
                            error!(session = %session_id, error = %e, "upload failed");
                        }
                        CoordinatorEvent::Failed(e)
                    }
                };
                let _ = tx.send(event).await;
            }
        });
        Self {
            events,
            cancel,
            task,
        }
    }

    /// Receives the next event. `None` once the task has exited.
    pub async fn next_event(&mut self) -> Option<CoordinatorEvent> {
        self.events.recv().await
    }

    /// Stops the upload. In-flight transfers are abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChunkUploadCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Runs a coordinator to completion within `config.upload_timeout()`.
///
/// `on_event` sees every progress, chunk and retry event; the terminal
/// event becomes the return value.
pub async fn upload_chunks<F>(
    storage: Arc<dyn UploadStorage>,
    config: &UploadConfig,
    request: UploadRequest,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<String, UploadError>
where
    F: FnMut(&CoordinatorEvent),
{
    let mut coordinator = ChunkUploadCoordinator::spawn(storage, config, request, cancel);
    let timeout = config.upload_timeout();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::CancelledByUser),
            _ = &mut deadline => return Err(UploadError::UploadTimeout(timeout)),
            event = coordinator.next_event() => match event {
                Some(CoordinatorEvent::Completed { url }) => return Ok(url),
                Some(CoordinatorEvent::Failed(e)) => return Err(e),
                Some(event) => on_event(&event),
                None => {
                    return Err(UploadError::Worker(
                        "upload task exited without a result".into(),
                    ));
                }
            },
        }
    }
}

async fn run(
    storage: Arc<dyn UploadStorage>,
    limits: Limits,
    request: UploadRequest,
    cancel: &CancellationToken,
    events: &mpsc::Sender<CoordinatorEvent>,
) -> Result<String, UploadError> {
    let total_bytes = request.source.size();
    let (mut tracker, unknown) = ChunkTracker::new(
        total_bytes,
        limits.chunk_size,
        request.already_uploaded.iter().copied(),
    );
    if !unknown.is_empty() {
        warn!(
            session = %request.session_id,
            indices = ?unknown,
            "ignoring uploaded chunk indices outside the partition"
        );
    }
    let total_chunks = tracker.len();
    debug!(
        session = %request.session_id,
        total_bytes,
        total_chunks,
        already_uploaded = tracker.uploaded_count(),
        "starting chunk upload"
    );
    emit_progress(events, &tracker, total_bytes).await;

    let mut transfers = JoinSet::new();
    loop {
        let now = Instant::now();
        while tracker.in_flight() < limits.max_concurrency {
            let Some(dispatch) = tracker.next_ready(now) else {
                break;
            };
            transfers.spawn(transfer_chunk(
                storage.clone(),
                request.source.clone(),
                request.session_id.clone(),
                dispatch,
            ));
        }
        if tracker.in_flight() == 0 && tracker.waiting_retries() == 0 {
            break;
        }

        // Only wake for a retry when a slot is free to run it.
        let retry_at = if tracker.in_flight() < limits.max_concurrency {
            tracker.next_retry_at()
        } else {
            None
        };
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::CancelledByUser),
            joined = transfers.join_next(), if tracker.in_flight() > 0 => joined,
            _ = tokio::time::sleep_until(retry_at.unwrap_or(now)), if retry_at.is_some() => {
                continue;
            }
        };
        let Some(joined) = joined else {
            break;
        };
        let (index, outcome) =
            joined.map_err(|e| UploadError::Worker(format!("chunk task failed: {e}")))?;

        match outcome {
            Ok(()) => {
                let len = tracker.complete(index);
                debug!(session = %request.session_id, index, bytes = len, "chunk uploaded");
                let _ = events.send(CoordinatorEvent::ChunkUploaded { index }).await;
                emit_progress(events, &tracker, total_bytes).await;
            }
            Err(reason) => match tracker.fail(
                index,
                limits.max_retries,
                Instant::now() + limits.retry_delay,
            ) {
                ChunkStatus::RetryPending { attempt } => {
                    warn!(
                        session = %request.session_id,
                        index,
                        attempt,
                        error = %reason,
                        "chunk failed, retrying"
                    );
                    let _ = events
                        .send(CoordinatorEvent::ChunkRetry {
                            index,
                            attempt,
                            reason,
                        })
                        .await;
                }
                ChunkStatus::Failed { attempts } => {
                    return Err(UploadError::ChunkUpload {
                        index,
                        attempts,
                        reason,
                    });
                }
                other => {
                    return Err(UploadError::Worker(format!(
                        "chunk {index} in unexpected state {other:?}"
                    )));
                }
            },
        }
    }

    if !tracker.is_done() {
        return Err(UploadError::Worker(
            "transfers drained before every chunk was uploaded".into(),
        ));
    }
    if cancel.is_cancelled() {
        return Err(UploadError::CancelledByUser);
    }

    let finalize = FinalizeRequest {
        session_id: request.session_id.clone(),
        content_hash: request.content_hash.clone(),
        file_name: request.file_name.clone(),
        file_size: total_bytes,
        total_chunks,
    };
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UploadError::CancelledByUser),
        response = storage.finalize(finalize) => response.map_err(UploadError::Finalize)?,
    };
    Ok(response.url)
}

async fn emit_progress(
    events: &mpsc::Sender<CoordinatorEvent>,
    tracker: &ChunkTracker,
    total_bytes: u64,
) {
    let _ = events
        .send(CoordinatorEvent::Progress {
            bytes_uploaded: tracker.uploaded_bytes(),
            total_bytes,
            chunks_uploaded: tracker.uploaded_count(),
            total_chunks: tracker.len(),
        })
        .await;
}

/// Reads, checksums and sends one chunk. Errors are reduced to a reason
/// string; the run loop decides whether to retry.
async fn transfer_chunk(
    storage: Arc<dyn UploadStorage>,
    source: Arc<dyn BlobSource>,
    session_id: String,
    dispatch: Dispatch,
) -> (u32, Result<(), String>) {
    let index = dispatch.index;
    (index, send_chunk(storage, source, session_id, dispatch.range, index).await)
}

async fn send_chunk(
    storage: Arc<dyn UploadStorage>,
    source: Arc<dyn BlobSource>,
    session_id: String,
    range: ByteRange,
    index: u32,
) -> Result<(), String> {
    let payload = tokio::task::spawn_blocking(move || source.read_range(range))
        .await
        .map_err(|e| format!("read task failed: {e}"))?
        .map_err(|e| e.to_string())?;

    let request = UploadChunkRequest {
        session_id,
        index,
        range,
        checksum: checksum_bytes(&payload),
        payload,
    };
    let ack = storage
        .upload_chunk(request)
        .await
        .map_err(|e| e.to_string())?;

    if ack.received_bytes != range.len() {
        return Err(format!(
            "storage acknowledged {} of {} bytes",
            ack.received_bytes,
            range.len()
        ));
    }
    Ok(())
}
