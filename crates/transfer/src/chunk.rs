use std::collections::VecDeque;

use quire_protocol::ByteRange;
use tokio::time::Instant;

/// Per-chunk transfer state.
///
/// Transitions: `Pending -> InFlight -> (Uploaded | RetryPending -> InFlight) -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    /// A transfer attempt (1-based) is running.
    InFlight { attempt: u32 },
    /// Waiting for the retry delay before `attempt` starts.
    RetryPending { attempt: u32 },
    Uploaded,
    Failed { attempts: u32 },
}

/// A contiguous byte range of a file: the unit of transfer and retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub range: ByteRange,
    pub status: ChunkStatus,
}

/// Number of chunks `partition` produces for the given sizes.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u32 {
    assert!(chunk_size > 0, "chunk size must be > 0");
    if file_size == 0 {
        return 1;
    }
    file_size.div_ceil(chunk_size) as u32
}

/// Splits a file into `[index * chunk_size, min((index + 1) * chunk_size, file_size))`
/// ranges.
///
/// The result depends only on its inputs, so re-deriving it after a crash
/// reproduces the same partition. A zero-byte file yields a single `[0, 0)`
/// chunk.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
pub fn partition(file_size: u64, chunk_size: u64) -> Vec<Chunk> {
    let count = chunk_count(file_size, chunk_size);
    (0..count)
        .map(|index| {
            let start = index as u64 * chunk_size;
            let end = (start + chunk_size).min(file_size);
            Chunk {
                index,
                range: ByteRange::new(start, end),
                status: ChunkStatus::Pending,
            }
        })
        .collect()
}

/// A chunk handed out for transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub index: u32,
    pub range: ByteRange,
    pub attempt: u32,
}

impl Dispatch {
    /// Returns `true` when this dispatch follows a failed attempt.
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Drives the per-chunk state machine for one upload attempt.
///
/// Uploaded totals are running counters, updated on each completion.
#[derive(Debug)]
pub struct ChunkTracker {
    chunks: Vec<Chunk>,
    /// Chunks never attempted, in index order.
    pending: VecDeque<u32>,
    /// Failed chunks waiting out their retry delay, ordered by ready time.
    retries: VecDeque<(u32, Instant)>,
    in_flight: usize,
    uploaded_count: u32,
    uploaded_bytes: u64,
}

impl ChunkTracker {
    /// Partitions the file and marks `already_uploaded` indices as `Uploaded`.
    ///
    /// Indices outside the partition are returned in the second tuple slot
    /// and otherwise ignored.
    pub fn new(
        file_size: u64,
        chunk_size: u64,
        already_uploaded: impl IntoIterator<Item = u32>,
    ) -> (Self, Vec<u32>) {
        let mut chunks = partition(file_size, chunk_size);
        let mut unknown = Vec::new();
        let mut uploaded_count = 0;
        let mut uploaded_bytes = 0;
        for index in already_uploaded {
            match chunks.get_mut(index as usize) {
                Some(chunk) if chunk.status == ChunkStatus::Uploaded => {}
                Some(chunk) => {
                    chunk.status = ChunkStatus::Uploaded;
                    uploaded_count += 1;
                    uploaded_bytes += chunk.range.len();
                }
                None => unknown.push(index),
            }
        }
        let pending = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Pending)
            .map(|c| c.index)
            .collect();
        (
            Self {
                chunks,
                pending,
                retries: VecDeque::new(),
                in_flight: 0,
                uploaded_count,
                uploaded_bytes,
            },
            unknown,
        )
    }

    /// Moves the next chunk that may start at `now` into flight.
    ///
    /// Retries whose delay has elapsed are served before chunks that were
    /// never attempted.
    pub fn next_ready(&mut self, now: Instant) -> Option<Dispatch> {
        let index = match self.retries.front() {
            Some(&(index, ready_at)) if ready_at <= now => {
                self.retries.pop_front();
                index
            }
            _ => self.pending.pop_front()?,
        };
        let chunk = &mut self.chunks[index as usize];
        let attempt = match chunk.status {
            ChunkStatus::Pending => 1,
            ChunkStatus::RetryPending { attempt } => attempt,
            other => unreachable!("chunk {index} queued while {other:?}"),
        };
        chunk.status = ChunkStatus::InFlight { attempt };
        self.in_flight += 1;
        Some(Dispatch {
            index,
            range: chunk.range,
            attempt,
        })
    }

    /// When the earliest waiting retry becomes ready, if any is waiting.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retries.front().map(|&(_, ready_at)| ready_at)
    }

    /// Records a successful transfer. Returns the chunk's byte length.
    pub fn complete(&mut self, index: u32) -> u64 {
        let chunk = &mut self.chunks[index as usize];
        debug_assert!(matches!(chunk.status, ChunkStatus::InFlight { .. }));
        chunk.status = ChunkStatus::Uploaded;
        self.in_flight -= 1;
        self.uploaded_count += 1;
        self.uploaded_bytes += chunk.range.len();
        chunk.range.len()
    }

    /// Records a failed transfer attempt and returns the resulting status.
    ///
    /// While fewer than `max_retries + 1` attempts were made the chunk waits
    /// as `RetryPending` until `retry_at`, otherwise it becomes `Failed`.
    /// Callers use a fixed retry delay, so ready times arrive in order.
    pub fn fail(&mut self, index: u32, max_retries: u32, retry_at: Instant) -> ChunkStatus {
        let chunk = &mut self.chunks[index as usize];
        let ChunkStatus::InFlight { attempt } = chunk.status else {
            unreachable!("chunk {index} failed while {:?}", chunk.status);
        };
        self.in_flight -= 1;
        chunk.status = if attempt <= max_retries {
            self.retries.push_back((index, retry_at));
            ChunkStatus::RetryPending {
                attempt: attempt + 1,
            }
        } else {
            ChunkStatus::Failed { attempts: attempt }
        };
        chunk.status
    }

    /// Number of transfers currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Number of chunks waiting out a retry delay.
    pub fn waiting_retries(&self) -> usize {
        self.retries.len()
    }

    /// Returns `true` once every chunk is `Uploaded`.
    pub fn is_done(&self) -> bool {
        self.uploaded_count == self.len()
    }

    /// Bytes covered by uploaded chunks.
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn uploaded_count(&self) -> u32 {
        self.uploaded_count
    }

    pub fn uploaded_indices(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Uploaded)
            .map(|c| c.index)
            .collect()
    }

    pub fn status(&self, index: u32) -> Option<ChunkStatus> {
        self.chunks.get(index as usize).map(|c| c.status)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Always `false`: even an empty file has one chunk.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
