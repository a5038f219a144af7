//! Upload session state machine.
//!
//! A session sequences hashing, the dedup lookup, the resume-state fetch
//! and the chunk transfer for one selected file:
//!
//! ```text
//! Idle -> Hashing -> CheckingExistence -> FetchingResumeState -> Uploading -> Completed
//!                          \--(exists)--> Completed
//! busy --pause--> Paused --resume--> (first phase whose result is unknown)
//! Uploading --pause--> Paused --resume--> CheckingExistence -> Uploading
//! busy --failure--> Failed --resume (can_resume)--> CheckingExistence
//! any but Completed --cancel--> Cancelled
//! ```
//!
//! Every attempt gets a generation number and a cancellation token.
//! `pause`, `cancel`, `reset` and a new file selection bump the generation
//! and cancel the token, so results and progress from a torn-down attempt
//! are dropped instead of applied.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quire_protocol::{ChunkProgressInfo, SessionSnapshot, UploadStatus};
use quire_transfer::{
    BlobSource, HashOptions, HashProgress, SpeedEstimator, chunk_count, compute_hash,
    percent_of, validate_file, validate_storage_key,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::coordinator::{CoordinatorEvent, UploadRequest, upload_chunks};
use crate::error::UploadError;
use crate::storage::UploadStorage;
use crate::types::SessionCallbacks;

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Bytes covered by `indices` in a file partitioned into `chunk_size` chunks.
fn covered_bytes(indices: &BTreeSet<u32>, file_size: u64, chunk_size: u64) -> u64 {
    indices
        .iter()
        .map(|&index| {
            let start = (index as u64 * chunk_size).min(file_size);
            (start + chunk_size).min(file_size) - start
        })
        .sum()
}

struct SessionState {
    source: Option<Arc<dyn BlobSource>>,
    file_name: Option<String>,
    file_size: u64,
    session_id: String,
    content_hash: Option<String>,
    status: UploadStatus,
    progress_percent: u8,
    hash_progress_percent: u8,
    result_url: Option<String>,
    error: Option<String>,
    can_resume: bool,
    /// Chunk indices known to be stored remotely.
    uploaded: BTreeSet<u32>,
    existence_checked: bool,
    resume_known: bool,
    paused: bool,
    active: Option<CancellationToken>,
    generation: u64,
    estimator: SpeedEstimator,
}

impl SessionState {
    fn new(session_id: String, generation: u64) -> Self {
        Self {
            source: None,
            file_name: None,
            file_size: 0,
            session_id,
            content_hash: None,
            status: UploadStatus::Idle,
            progress_percent: 0,
            hash_progress_percent: 0,
            result_url: None,
            error: None,
            can_resume: false,
            uploaded: BTreeSet::new(),
            existence_checked: false,
            resume_known: false,
            paused: false,
            active: None,
            generation,
            estimator: SpeedEstimator::new(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.paused
    }

    /// Tears down the running attempt, if any.
    fn stop(&mut self) {
        self.generation += 1;
        if let Some(token) = self.active.take() {
            token.cancel();
        }
    }

    /// Phase a new attempt starts in.
    fn first_phase(&self) -> UploadStatus {
        if self.content_hash.is_none() {
            UploadStatus::Hashing
        } else if !self.existence_checked {
            UploadStatus::CheckingExistence
        } else if !self.resume_known {
            UploadStatus::FetchingResumeState
        } else {
            UploadStatus::Uploading
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Start,
    Resume,
}

/// One run of the pipeline.
struct Attempt {
    generation: u64,
    cancel: CancellationToken,
    source: Arc<dyn BlobSource>,
    session_id: String,
    file_name: String,
    file_size: u64,
}

/// Caller-facing upload orchestrator for a single file.
///
/// All methods take `&self`, so one task can drive `start`/`resume` while
/// another calls `pause` or `cancel`.
pub struct UploadSession {
    storage: Arc<dyn UploadStorage>,
    config: UploadConfig,
    callbacks: SessionCallbacks,
    state: Mutex<SessionState>,
}

impl UploadSession {
    pub fn new(storage: Arc<dyn UploadStorage>, config: UploadConfig) -> Result<Self, UploadError> {
        Self::with_callbacks(storage, config, SessionCallbacks::default())
    }

    pub fn with_callbacks(
        storage: Arc<dyn UploadStorage>,
        config: UploadConfig,
        callbacks: SessionCallbacks,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            callbacks,
            state: Mutex::new(SessionState::new(new_session_id(), 0)),
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Selects the file to upload under a fresh session id.
    ///
    /// Validation failures leave the session untouched. With `auto_upload`
    /// the upload starts right away and this returns what [`start`](Self::start)
    /// returns.
    pub async fn select_file(
        &self,
        source: Arc<dyn BlobSource>,
        file_name: &str,
    ) -> Result<Option<String>, UploadError> {
        self.select(source, file_name, None).await
    }

    /// Selects a file and continues under a session id from an earlier
    /// process, so chunks it stored are picked up on `start`.
    pub async fn select_file_with_session(
        &self,
        source: Arc<dyn BlobSource>,
        file_name: &str,
        session_id: &str,
    ) -> Result<Option<String>, UploadError> {
        self.select(source, file_name, Some(session_id.to_string()))
            .await
    }

    /// Runs the pipeline from the first phase whose result is unknown.
    ///
    /// Allowed from `Idle` (with a file), `Failed` and `Cancelled`. Returns
    /// the result URL, or `None` when the attempt was paused, cancelled or
    /// superseded before it finished.
    pub async fn start(&self) -> Result<Option<String>, UploadError> {
        self.run(Entry::Start).await
    }

    /// Continues a paused session, or a failed one that `can_resume`.
    pub async fn resume(&self) -> Result<Option<String>, UploadError> {
        self.run(Entry::Resume).await
    }

    /// Tears down background work and keeps everything learned so far.
    ///
    /// Pausing the transfer phase forgets the dedup lookup, so `resume`
    /// first asks the storage whether the object was finalized meanwhile.
    pub fn pause(&self) -> Result<(), UploadError> {
        {
            let mut state = self.state();
            if !state.status.is_busy() {
                return Err(UploadError::InvalidState {
                    operation: "pause",
                    status: state.status,
                });
            }
            state.paused = true;
            if let Some(token) = state.active.take() {
                token.cancel();
            }
            // The storage may have finalized the object before the teardown
            // landed, dropping the session's chunks. Resume looks it up again.
            if state.status == UploadStatus::Uploading {
                state.existence_checked = false;
            }
            state.status = UploadStatus::Paused;
            if state.content_hash.is_none() {
                state.hash_progress_percent = 0;
            }
            debug!(
                session = %state.session_id,
                chunks_uploaded = state.uploaded.len(),
                "upload paused"
            );
        }
        self.callbacks.status(UploadStatus::Paused);
        Ok(())
    }

    /// Stops the session for good and asks the storage to drop its chunks.
    ///
    /// Local state always resets, even when the remote cancel fails. The
    /// session gets a new id so a later `start` begins from scratch.
    pub async fn cancel(&self) -> Result<(), UploadError> {
        let old_session = {
            let mut state = self.state();
            match state.status {
                UploadStatus::Completed => {
                    return Err(UploadError::InvalidState {
                        operation: "cancel",
                        status: state.status,
                    });
                }
                UploadStatus::Cancelled => return Ok(()),
                _ => {}
            }
            state.stop();
            state.paused = true;
            state.status = UploadStatus::Cancelled;
            state.progress_percent = 0;
            if state.content_hash.is_none() {
                state.hash_progress_percent = 0;
            }
            state.result_url = None;
            state.error = None;
            state.can_resume = false;
            state.uploaded.clear();
            state.existence_checked = false;
            state.resume_known = false;
            state.estimator.reset();
            std::mem::replace(&mut state.session_id, new_session_id())
        };
        self.callbacks.status(UploadStatus::Cancelled);
        info!(session = %old_session, "upload cancelled");

        if let Err(e) = self.storage.cancel(&old_session).await {
            warn!(session = %old_session, error = %e, "remote cancel failed");
        }
        Ok(())
    }

    /// Drops the file and all progress and returns to a fresh `Idle`.
    ///
    /// Chunks already stored remotely are left alone.
    pub fn reset(&self) {
        {
            let mut state = self.state();
            state.stop();
            let generation = state.generation;
            *state = SessionState::new(new_session_id(), generation);
        }
        self.callbacks.status(UploadStatus::Idle);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn status(&self) -> UploadStatus {
        self.state().status
    }

    pub fn session_id(&self) -> String {
        self.state().session_id.clone()
    }

    pub fn content_hash(&self) -> Option<String> {
        self.state().content_hash.clone()
    }

    pub fn progress_percent(&self) -> u8 {
        self.state().progress_percent
    }

    pub fn hash_progress_percent(&self) -> u8 {
        self.state().hash_progress_percent
    }

    pub fn result_url(&self) -> Option<String> {
        self.state().result_url.clone()
    }

    /// User-facing message of the last failure.
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn can_resume(&self) -> bool {
        self.state().can_resume
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            session_id: state.session_id.clone(),
            status: state.status,
            file_name: state.file_name.clone(),
            file_size: state.file_size,
            content_hash: state.content_hash.clone(),
            progress_percent: state.progress_percent,
            hash_progress_percent: state.hash_progress_percent,
            result_url: state.result_url.clone(),
            error: state.error.clone(),
            can_resume: state.can_resume,
            chunks_uploaded: state.uploaded.len() as u32,
        }
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn select(
        &self,
        source: Arc<dyn BlobSource>,
        file_name: &str,
        session_id: Option<String>,
    ) -> Result<Option<String>, UploadError> {
        let status = self.state().status;
        if status.is_busy() {
            return Err(UploadError::InvalidState {
                operation: "select_file",
                status,
            });
        }
        let file_size = source.size();
        validate_file(file_name, file_size, self.config.max_file_size)?;
        if let Some(id) = &session_id {
            validate_storage_key(id).map_err(|e| UploadError::Validation(e.to_string()))?;
        }

        {
            let mut state = self.state();
            if state.status.is_busy() {
                return Err(UploadError::InvalidState {
                    operation: "select_file",
                    status: state.status,
                });
            }
            state.stop();
            let generation = state.generation;
            *state = SessionState::new(session_id.unwrap_or_else(new_session_id), generation);
            state.source = Some(source);
            state.file_name = Some(file_name.to_string());
            state.file_size = file_size;
            debug!(session = %state.session_id, file = file_name, file_size, "file selected");
        }
        self.callbacks.status(UploadStatus::Idle);

        if self.config.auto_upload {
            self.start().await
        } else {
            Ok(None)
        }
    }

    async fn run(&self, entry: Entry) -> Result<Option<String>, UploadError> {
        let (attempt, first) = self.begin(entry)?;
        self.callbacks.status(first);
        let result = self.pipeline(&attempt).await;
        self.finish(&attempt, result).await
    }

    fn begin(&self, entry: Entry) -> Result<(Attempt, UploadStatus), UploadError> {
        let mut state = self.state();
        let (operation, allowed) = match entry {
            Entry::Start => (
                "start",
                matches!(
                    state.status,
                    UploadStatus::Idle | UploadStatus::Failed | UploadStatus::Cancelled
                ),
            ),
            Entry::Resume => (
                "resume",
                state.status == UploadStatus::Paused
                    || (state.status == UploadStatus::Failed && state.can_resume),
            ),
        };
        if !allowed {
            return Err(UploadError::InvalidState {
                operation,
                status: state.status,
            });
        }
        let Some(source) = state.source.clone() else {
            return Err(UploadError::Validation("no file selected".into()));
        };

        match entry {
            Entry::Start => {
                // The content hash is immutable; everything remote is re-read.
                state.existence_checked = false;
                state.resume_known = false;
                state.uploaded.clear();
                state.progress_percent = 0;
                state.can_resume = false;
            }
            Entry::Resume if state.status == UploadStatus::Failed => {
                // A failed finalize may still have stored the object.
                state.existence_checked = false;
                state.resume_known = false;
            }
            Entry::Resume => {}
        }

        state.stop();
        state.paused = false;
        state.error = None;
        state.result_url = None;
        let cancel = CancellationToken::new();
        state.active = Some(cancel.clone());
        let first = state.first_phase();
        state.status = first;
        debug!(session = %state.session_id, operation, phase = ?first, "attempt started");

        Ok((
            Attempt {
                generation: state.generation,
                cancel,
                source,
                session_id: state.session_id.clone(),
                file_name: state.file_name.clone().unwrap_or_default(),
                file_size: state.file_size,
            },
            first,
        ))
    }

    async fn pipeline(&self, attempt: &Attempt) -> Result<String, UploadError> {
        let generation = attempt.generation;

        let known_hash = self.state().content_hash.clone();
        let content_hash = match known_hash {
            Some(hash) => hash,
            None => {
                self.enter(generation, UploadStatus::Hashing)?;
                let options = HashOptions {
                    slice_size: self.config.hash_chunk_size,
                    timeout: self.config.hash_timeout(),
                };
                let hash = compute_hash(attempt.source.clone(), options, &attempt.cancel, |p| {
                    self.on_hash_progress(generation, p)
                })
                .await?;
                self.update(generation, |s| s.content_hash = Some(hash.clone()))?;
                debug!(session = %attempt.session_id, hash = %hash, "content hash computed");
                hash
            }
        };

        let existence_checked = self.state().existence_checked;
        if !existence_checked {
            self.enter(generation, UploadStatus::CheckingExistence)?;
            let response = tokio::select! {
                biased;
                _ = attempt.cancel.cancelled() => return Err(UploadError::CancelledByUser),
                response = self.storage.exists_by_hash(&content_hash) => {
                    response.map_err(UploadError::ExistenceCheck)?
                }
            };
            if response.exists {
                match response.url {
                    Some(url) => {
                        debug!(session = %attempt.session_id, url = %url, "content already stored");
                        return Ok(url);
                    }
                    None => warn!(
                        session = %attempt.session_id,
                        "storage reported the object without a url, uploading anyway"
                    ),
                }
            }
            self.update(generation, |s| s.existence_checked = true)?;
        }

        let resume_known = self.state().resume_known;
        if !resume_known {
            self.enter(generation, UploadStatus::FetchingResumeState)?;
            let indices = tokio::select! {
                biased;
                _ = attempt.cancel.cancelled() => return Err(UploadError::CancelledByUser),
                indices = self.storage.list_uploaded_chunks(&attempt.session_id) => {
                    indices.map_err(UploadError::ResumeState)?
                }
            };
            let total_chunks = chunk_count(attempt.file_size, self.config.chunk_size);
            self.update(generation, |s| {
                s.uploaded = indices.into_iter().filter(|&i| i < total_chunks).collect();
                s.resume_known = true;
            })?;
        }

        let already_uploaded = self.begin_transfer(attempt)?;
        let request = UploadRequest {
            source: attempt.source.clone(),
            session_id: attempt.session_id.clone(),
            content_hash,
            file_name: attempt.file_name.clone(),
            already_uploaded,
        };
        upload_chunks(
            self.storage.clone(),
            &self.config,
            request,
            &attempt.cancel,
            |event| self.on_transfer_event(generation, event),
        )
        .await
    }

    /// Moves a current attempt into `status`.
    fn enter(&self, generation: u64, status: UploadStatus) -> Result<(), UploadError> {
        let changed = {
            let mut state = self.state();
            if !state.is_current(generation) {
                return Err(UploadError::CancelledByUser);
            }
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            self.callbacks.status(status);
        }
        Ok(())
    }

    /// Applies `f` if the attempt is still current.
    fn update(
        &self,
        generation: u64,
        f: impl FnOnce(&mut SessionState),
    ) -> Result<(), UploadError> {
        let mut state = self.state();
        if !state.is_current(generation) {
            return Err(UploadError::CancelledByUser);
        }
        f(&mut state);
        Ok(())
    }

    fn begin_transfer(&self, attempt: &Attempt) -> Result<Vec<u32>, UploadError> {
        self.enter(attempt.generation, UploadStatus::Uploading)?;
        let mut state = self.state();
        if !state.is_current(attempt.generation) {
            return Err(UploadError::CancelledByUser);
        }
        state.estimator.reset();
        let covered = covered_bytes(&state.uploaded, attempt.file_size, self.config.chunk_size);
        state.progress_percent = percent_of(covered, attempt.file_size);
        debug!(
            session = %attempt.session_id,
            already_uploaded = state.uploaded.len(),
            "transfer phase started"
        );
        Ok(state.uploaded.iter().copied().collect())
    }

    fn on_hash_progress(&self, generation: u64, progress: HashProgress) {
        let percent = {
            let mut state = self.state();
            if !state.is_current(generation) {
                return;
            }
            state.hash_progress_percent = state.hash_progress_percent.max(progress.percent);
            state.hash_progress_percent
        };
        self.callbacks.hash_progress(percent);
    }

    fn on_transfer_event(&self, generation: u64, event: &CoordinatorEvent) {
        match event {
            CoordinatorEvent::ChunkUploaded { index } => {
                let mut state = self.state();
                if state.is_current(generation) {
                    state.uploaded.insert(*index);
                }
            }
            CoordinatorEvent::Progress {
                bytes_uploaded,
                total_bytes,
                chunks_uploaded,
                total_chunks,
            } => {
                let info = {
                    let mut state = self.state();
                    if !state.is_current(generation) {
                        return;
                    }
                    let report = state.estimator.update(*bytes_uploaded, *total_bytes);
                    state.progress_percent = state.progress_percent.max(report.percent);
                    ChunkProgressInfo {
                        session_id: state.session_id.clone(),
                        bytes_uploaded: *bytes_uploaded,
                        total_bytes: *total_bytes,
                        chunks_uploaded: *chunks_uploaded,
                        total_chunks: *total_chunks,
                        percent: state.progress_percent,
                        speed_label: report.speed_label,
                        eta_label: report.eta_label,
                    }
                };
                self.callbacks.progress(&info);
            }
            CoordinatorEvent::ChunkRetry { .. }
            | CoordinatorEvent::Completed { .. }
            | CoordinatorEvent::Failed(_) => {}
        }
    }

    /// Commits the outcome of an attempt unless it was torn down meanwhile.
    async fn finish(
        &self,
        attempt: &Attempt,
        result: Result<String, UploadError>,
    ) -> Result<Option<String>, UploadError> {
        // Gives a pause or cancel issued alongside the last message a chance
        // to land before the terminal commit.
        tokio::task::yield_now().await;

        let mut state = self.state();
        if !state.is_current(attempt.generation) {
            debug!(session = %attempt.session_id, "attempt torn down, dropping its outcome");
            return Ok(None);
        }
        state.active = None;

        match result {
            Ok(url) => {
                state.status = UploadStatus::Completed;
                state.progress_percent = 100;
                state.result_url = Some(url.clone());
                state.can_resume = false;
                drop(state);

                info!(session = %attempt.session_id, url = %url, "upload completed");
                self.callbacks.status(UploadStatus::Completed);
                self.callbacks.complete(&url);
                Ok(Some(url))
            }
            Err(e) if e.is_cancellation() => Ok(None),
            Err(e) => {
                let message = e.user_message();
                let can_resume = e.keeps_uploaded_chunks() && !state.uploaded.is_empty();
                state.status = UploadStatus::Failed;
                state.error = Some(message.clone());
                state.can_resume = can_resume;
                drop(state);

                error!(session = %attempt.session_id, error = %e, can_resume, "upload failed");
                self.callbacks.status(UploadStatus::Failed);
                self.callbacks.error(&message);
                Err(e)
            }
        }
    }
}
