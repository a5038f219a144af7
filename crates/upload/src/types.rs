//! Caller-facing callback set for upload sessions.

use quire_protocol::{ChunkProgressInfo, UploadStatus};

type ProgressFn = Box<dyn Fn(&ChunkProgressInfo) + Send + Sync>;
type PercentFn = Box<dyn Fn(u8) + Send + Sync>;
type StatusFn = Box<dyn Fn(UploadStatus) + Send + Sync>;
type MessageFn = Box<dyn Fn(&str) + Send + Sync>;

/// Observers notified by an [`UploadSession`](crate::UploadSession).
///
/// Callbacks run on the task that drives the session, never while the
/// session's state lock is held, so they may call back into the session.
#[derive(Default)]
pub struct SessionCallbacks {
    progress: Option<ProgressFn>,
    hash_progress: Option<PercentFn>,
    status: Option<StatusFn>,
    complete: Option<MessageFn>,
    error: Option<MessageFn>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfer progress, including speed and ETA labels.
    pub fn on_progress(mut self, f: impl Fn(&ChunkProgressInfo) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Hashing progress in percent.
    pub fn on_hash_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.hash_progress = Some(Box::new(f));
        self
    }

    pub fn on_status(mut self, f: impl Fn(UploadStatus) + Send + Sync + 'static) -> Self {
        self.status = Some(Box::new(f));
        self
    }

    /// Receives the result URL.
    pub fn on_complete(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// Receives the user-facing error message. Not called for cancellation.
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub(crate) fn progress(&self, info: &ChunkProgressInfo) {
        if let Some(f) = &self.progress {
            f(info);
        }
    }

    pub(crate) fn hash_progress(&self, percent: u8) {
        if let Some(f) = &self.hash_progress {
            f(percent);
        }
    }

    pub(crate) fn status(&self, status: UploadStatus) {
        if let Some(f) = &self.status {
            f(status);
        }
    }

    pub(crate) fn complete(&self, url: &str) {
        if let Some(f) = &self.complete {
            f(url);
        }
    }

    pub(crate) fn error(&self, message: &str) {
        if let Some(f) = &self.error {
            f(message);
        }
    }
}
