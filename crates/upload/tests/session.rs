use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quire_protocol::messages::{
    ChunkAck, ExistsResponse, FinalizeRequest, FinalizeResponse, UploadChunkRequest,
};
use quire_protocol::{ByteRange, UploadStatus};
use quire_transfer::{
    BlobSource, FileBlob, HashFailure, MemoryBlob, TransferError, checksum_bytes,
};
use quire_upload::{
    InMemoryStorage, SessionCallbacks, StorageError, StorageFuture, UploadConfig, UploadError,
    UploadSession, UploadStorage,
};

const CHUNK: u64 = 1024;

fn data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn config() -> UploadConfig {
    UploadConfig {
        chunk_size: CHUNK,
        hash_chunk_size: CHUNK,
        retry_delay_ms: 5,
        ..UploadConfig::default()
    }
}

fn blob(bytes: &[u8]) -> Arc<dyn BlobSource> {
    Arc::new(MemoryBlob::new(bytes.to_vec()))
}

#[derive(Clone, Default)]
struct Recorder {
    statuses: Arc<Mutex<Vec<UploadStatus>>>,
    percents: Arc<Mutex<Vec<u8>>>,
    completed: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn callbacks(&self) -> SessionCallbacks {
        let statuses = self.statuses.clone();
        let percents = self.percents.clone();
        let completed = self.completed.clone();
        let errors = self.errors.clone();
        SessionCallbacks::new()
            .on_status(move |s| statuses.lock().unwrap().push(s))
            .on_progress(move |info| percents.lock().unwrap().push(info.percent))
            .on_complete(move |url| completed.lock().unwrap().push(url.to_string()))
            .on_error(move |msg| errors.lock().unwrap().push(msg.to_string()))
    }

    fn statuses(&self) -> Vec<UploadStatus> {
        self.statuses.lock().unwrap().clone()
    }

    fn percents(&self) -> Vec<u8> {
        self.percents.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

fn session_with(
    storage: &Arc<InMemoryStorage>,
    config: UploadConfig,
    recorder: &Recorder,
) -> Arc<UploadSession> {
    Arc::new(
        UploadSession::with_callbacks(storage.clone(), config, recorder.callbacks()).unwrap(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

/// Blob whose reads block for `delay` each.
struct SlowBlob {
    data: Vec<u8>,
    delay: Duration,
}

impl BlobSource for SlowBlob {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, TransferError> {
        std::thread::sleep(self.delay);
        Ok(self.data[range.start as usize..range.end as usize].to_vec())
    }
}

/// Blob whose reads block until `open` is set.
struct GatedBlob {
    data: Vec<u8>,
    open: Arc<AtomicBool>,
}

impl BlobSource for GatedBlob {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, TransferError> {
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(self.data[range.start as usize..range.end as usize].to_vec())
    }
}

/// Storage whose `finalize` answers `delay` after the object is stored.
struct SlowFinalize {
    inner: Arc<InMemoryStorage>,
    delay: Duration,
}

impl UploadStorage for SlowFinalize {
    fn exists_by_hash<'a>(&'a self, content_hash: &'a str) -> StorageFuture<'a, ExistsResponse> {
        self.inner.exists_by_hash(content_hash)
    }

    fn list_uploaded_chunks<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, Vec<u32>> {
        self.inner.list_uploaded_chunks(session_id)
    }

    fn upload_chunk(&self, request: UploadChunkRequest) -> StorageFuture<'_, ChunkAck> {
        self.inner.upload_chunk(request)
    }

    fn finalize(&self, request: FinalizeRequest) -> StorageFuture<'_, FinalizeResponse> {
        Box::pin(async move {
            let response = self.inner.finalize(request).await;
            tokio::time::sleep(self.delay).await;
            response
        })
    }

    fn cancel<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, ()> {
        self.inner.cancel(session_id)
    }
}

/// Storage that stores the object on `finalize` but reports a failure.
struct LostFinalizeResponse {
    inner: Arc<InMemoryStorage>,
}

impl UploadStorage for LostFinalizeResponse {
    fn exists_by_hash<'a>(&'a self, content_hash: &'a str) -> StorageFuture<'a, ExistsResponse> {
        self.inner.exists_by_hash(content_hash)
    }

    fn list_uploaded_chunks<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, Vec<u32>> {
        self.inner.list_uploaded_chunks(session_id)
    }

    fn upload_chunk(&self, request: UploadChunkRequest) -> StorageFuture<'_, ChunkAck> {
        self.inner.upload_chunk(request)
    }

    fn finalize(&self, request: FinalizeRequest) -> StorageFuture<'_, FinalizeResponse> {
        Box::pin(async move {
            self.inner.finalize(request).await?;
            Err::<FinalizeResponse, _>(StorageError::Unavailable("connection reset".into()))
        })
    }

    fn cancel<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, ()> {
        self.inner.cancel(session_id)
    }
}

#[tokio::test]
async fn uploads_file_through_every_phase() {
    let bytes = data(5 * CHUNK as usize + 100);
    let storage = Arc::new(InMemoryStorage::new());
    let recorder = Recorder::default();
    let session = session_with(&storage, config(), &recorder);

    assert_eq!(session.select_file(blob(&bytes), "report.pdf").await.unwrap(), None);
    let url = session.start().await.unwrap().unwrap();

    let hash = checksum_bytes(&bytes);
    assert_eq!(url, InMemoryStorage::object_url(&hash));
    assert_eq!(storage.object(&hash).unwrap(), bytes);
    assert_eq!(storage.finalize_calls(), 1);

    assert_eq!(
        recorder.statuses(),
        vec![
            UploadStatus::Idle,
            UploadStatus::Hashing,
            UploadStatus::CheckingExistence,
            UploadStatus::FetchingResumeState,
            UploadStatus::Uploading,
            UploadStatus::Completed,
        ]
    );
    let percents = recorder.percents();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last().copied(), Some(100));
    assert_eq!(*recorder.completed.lock().unwrap(), vec![url.clone()]);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, UploadStatus::Completed);
    assert_eq!(snapshot.progress_percent, 100);
    assert_eq!(snapshot.hash_progress_percent, 100);
    assert_eq!(snapshot.content_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(snapshot.result_url.as_deref(), Some(url.as_str()));
    assert_eq!(snapshot.chunks_uploaded, 6);
}

#[tokio::test]
async fn existing_content_skips_the_transfer() {
    let bytes = data(3000);
    let storage = Arc::new(InMemoryStorage::new());
    let existing = storage.insert_object(bytes.clone());
    let recorder = Recorder::default();
    let session = session_with(&storage, config(), &recorder);

    session.select_file(blob(&bytes), "dup.bin").await.unwrap();
    let url = session.start().await.unwrap();

    assert_eq!(url, Some(existing));
    assert_eq!(storage.upload_calls(), 0);
    assert_eq!(storage.finalize_calls(), 0);
    assert_eq!(session.status(), UploadStatus::Completed);
    assert_eq!(session.progress_percent(), 100);
    assert!(!recorder.statuses().contains(&UploadStatus::Uploading));
}

#[tokio::test]
async fn resumes_chunks_stored_by_an_earlier_process() {
    let bytes = data(5 * CHUNK as usize);
    let storage = Arc::new(InMemoryStorage::new());
    for index in 0..2u32 {
        let start = index as u64 * CHUNK;
        let payload = bytes[start as usize..(start + CHUNK) as usize].to_vec();
        storage
            .upload_chunk(UploadChunkRequest {
                session_id: "earlier-session".into(),
                index,
                range: ByteRange::new(start, start + CHUNK),
                checksum: checksum_bytes(&payload),
                payload,
            })
            .await
            .unwrap();
    }

    let recorder = Recorder::default();
    let session = session_with(&storage, config(), &recorder);
    session
        .select_file_with_session(blob(&bytes), "video.mp4", "earlier-session")
        .await
        .unwrap();
    let url = session.start().await.unwrap().unwrap();

    let resumed: BTreeSet<u32> = storage.transferred("earlier-session")[2..]
        .iter()
        .copied()
        .collect();
    assert_eq!(resumed, BTreeSet::from([2, 3, 4]));
    assert_eq!(storage.upload_calls(), 5);
    assert_eq!(url, InMemoryStorage::object_url(&checksum_bytes(&bytes)));
    assert_eq!(recorder.percents().first().copied(), Some(40));
}

#[tokio::test(start_paused = true)]
async fn ten_mib_file_respects_concurrency_bound() {
    let bytes = data(10 * 1024 * 1024);
    let storage = Arc::new(InMemoryStorage::new().with_latency(Duration::from_millis(5)));
    let cfg = UploadConfig {
        chunk_size: 2 * 1024 * 1024,
        max_concurrency: 2,
        ..UploadConfig::default()
    };
    let session = session_with(&storage, cfg, &Recorder::default());

    session.select_file(blob(&bytes), "big.bin").await.unwrap();
    session.start().await.unwrap();

    assert_eq!(storage.upload_calls(), 5);
    assert!(storage.peak_in_flight() <= 2);
    assert_eq!(storage.finalize_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_chunk_makes_session_resumable() {
    let bytes = data(6 * CHUNK as usize);
    let storage = Arc::new(InMemoryStorage::new());
    storage.fail_chunk(3, 100);
    let cfg = UploadConfig {
        max_retries: 1,
        max_concurrency: 1,
        ..config()
    };
    let recorder = Recorder::default();
    let session = session_with(&storage, cfg, &recorder);

    session.select_file(blob(&bytes), "data.csv").await.unwrap();
    let err = session.start().await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::ChunkUpload {
            index: 3,
            attempts: 2,
            ..
        }
    ));

    let session_id = session.session_id();
    assert_eq!(session.status(), UploadStatus::Failed);
    assert!(session.can_resume());
    assert_eq!(recorder.errors().len(), 1);
    assert_eq!(session.error(), Some(err.user_message()));
    let stored = storage.stored_chunks(&session_id);
    assert!(stored.starts_with(&[0, 1, 2]));
    assert!(!stored.contains(&3));

    storage.fail_chunk(3, 0);
    let calls = storage.upload_calls();
    let url = session.resume().await.unwrap().unwrap();

    assert_eq!(storage.upload_calls() - calls, 6 - stored.len());
    assert_eq!(url, InMemoryStorage::object_url(&checksum_bytes(&bytes)));
    assert_eq!(session.status(), UploadStatus::Completed);
    assert!(session.error().is_none());
}

#[tokio::test]
async fn zero_byte_file_completes() {
    let storage = Arc::new(InMemoryStorage::new());
    let session = session_with(&storage, config(), &Recorder::default());

    session.select_file(blob(&[]), "empty.txt").await.unwrap();
    let url = session.start().await.unwrap().unwrap();

    assert_eq!(storage.upload_calls(), 1);
    assert_eq!(url, InMemoryStorage::object_url(&checksum_bytes(&[])));
    assert_eq!(session.hash_progress_percent(), 100);
}

#[tokio::test(start_paused = true)]
async fn pause_keeps_uploaded_chunks() {
    let bytes = data(8 * CHUNK as usize);
    let storage = Arc::new(InMemoryStorage::new().with_latency(Duration::from_millis(30)));
    let cfg = UploadConfig {
        max_concurrency: 1,
        ..config()
    };
    let recorder = Recorder::default();
    let session = session_with(&storage, cfg, &recorder);
    session.select_file(blob(&bytes), "movie.mkv").await.unwrap();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    wait_until(|| session.snapshot().chunks_uploaded >= 2).await;
    session.pause().unwrap();

    assert_eq!(task.await.unwrap().unwrap(), None);
    assert_eq!(session.status(), UploadStatus::Paused);
    let session_id = session.session_id();
    let before_resume: BTreeSet<u32> = storage.stored_chunks(&session_id).into_iter().collect();
    let percent_at_pause = session.progress_percent();
    assert!(percent_at_pause > 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let logged = storage.transferred(&session_id).len();
    let url = session.resume().await.unwrap().unwrap();

    let after: Vec<u32> = storage.transferred(&session_id)[logged..].to_vec();
    assert!(after.iter().all(|index| !before_resume.contains(index)));
    assert_eq!(url, InMemoryStorage::object_url(&checksum_bytes(&bytes)));
    assert!(recorder.errors().is_empty());

    let statuses = recorder.statuses();
    let paused_at = statuses
        .iter()
        .position(|s| *s == UploadStatus::Paused)
        .unwrap();
    assert_eq!(
        statuses[paused_at + 1..],
        [
            UploadStatus::CheckingExistence,
            UploadStatus::Uploading,
            UploadStatus::Completed
        ]
    );
    assert!(recorder.percents().windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn pause_during_finalize_resumes_to_the_stored_object() {
    let bytes = data(4 * CHUNK as usize);
    let hash = checksum_bytes(&bytes);
    let storage = Arc::new(InMemoryStorage::new());
    let slow: Arc<dyn UploadStorage> = Arc::new(SlowFinalize {
        inner: storage.clone(),
        delay: Duration::from_millis(200),
    });
    let recorder = Recorder::default();
    let session =
        Arc::new(UploadSession::with_callbacks(slow, config(), recorder.callbacks()).unwrap());
    session.select_file(blob(&bytes), "late.bin").await.unwrap();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    wait_until(|| storage.finalize_calls() == 1).await;
    session.pause().unwrap();

    assert_eq!(task.await.unwrap().unwrap(), None);
    assert!(storage.object(&hash).is_some());
    let uploads = storage.upload_calls();

    let url = session.resume().await.unwrap().unwrap();
    assert_eq!(url, InMemoryStorage::object_url(&hash));
    assert_eq!(session.status(), UploadStatus::Completed);
    assert_eq!(storage.upload_calls(), uploads);
    assert_eq!(storage.finalize_calls(), 1);
    assert!(recorder.errors().is_empty());

    let statuses = recorder.statuses();
    let paused_at = statuses
        .iter()
        .position(|s| *s == UploadStatus::Paused)
        .unwrap();
    assert_eq!(
        statuses[paused_at + 1..],
        [UploadStatus::CheckingExistence, UploadStatus::Completed]
    );
}

#[tokio::test]
async fn resume_after_failed_finalize_finds_the_stored_object() {
    let bytes = data(3 * CHUNK as usize);
    let hash = checksum_bytes(&bytes);
    let storage = Arc::new(InMemoryStorage::new());
    let lossy: Arc<dyn UploadStorage> = Arc::new(LostFinalizeResponse {
        inner: storage.clone(),
    });
    let session = Arc::new(UploadSession::new(lossy, config()).unwrap());
    session.select_file(blob(&bytes), "lost.bin").await.unwrap();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, UploadError::Finalize(_)));
    assert!(session.can_resume());
    let uploads = storage.upload_calls();

    let url = session.resume().await.unwrap().unwrap();
    assert_eq!(url, InMemoryStorage::object_url(&hash));
    assert_eq!(storage.upload_calls(), uploads);
}

#[tokio::test]
async fn pause_during_hashing_recomputes_on_resume() {
    let bytes = data(8 * CHUNK as usize);
    let storage = Arc::new(InMemoryStorage::new());
    let session = session_with(&storage, config(), &Recorder::default());
    let source: Arc<dyn BlobSource> = Arc::new(SlowBlob {
        data: bytes.clone(),
        delay: Duration::from_millis(10),
    });
    session.select_file(source, "slow.bin").await.unwrap();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    wait_until(|| session.hash_progress_percent() > 0).await;
    session.pause().unwrap();
    assert_eq!(task.await.unwrap().unwrap(), None);
    assert_eq!(session.hash_progress_percent(), 0);
    assert!(session.content_hash().is_none());

    let url = session.resume().await.unwrap().unwrap();
    assert_eq!(url, InMemoryStorage::object_url(&checksum_bytes(&bytes)));
}

#[tokio::test(start_paused = true)]
async fn cancel_suppresses_error_callback() {
    let bytes = data(8 * CHUNK as usize);
    let storage = Arc::new(InMemoryStorage::new().with_latency(Duration::from_millis(30)));
    let cfg = UploadConfig {
        max_concurrency: 1,
        ..config()
    };
    let recorder = Recorder::default();
    let session = session_with(&storage, cfg, &recorder);
    session.select_file(blob(&bytes), "draft.docx").await.unwrap();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    wait_until(|| session.snapshot().chunks_uploaded >= 1).await;
    let old_id = session.session_id();
    session.cancel().await.unwrap();

    assert_eq!(task.await.unwrap().unwrap(), None);
    assert!(recorder.errors().is_empty());
    assert_eq!(session.status(), UploadStatus::Cancelled);
    assert_ne!(session.session_id(), old_id);
    assert_eq!(session.progress_percent(), 0);
    assert_eq!(storage.cancel_calls(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(storage.stored_chunks(&old_id).is_empty());
    assert_eq!(storage.finalize_calls(), 0);
    assert!(recorder.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_resets_locally_when_storage_is_down() {
    let storage = Arc::new(InMemoryStorage::new());
    let session = session_with(&storage, config(), &Recorder::default());
    session.select_file(blob(b"hello"), "a.txt").await.unwrap();
    storage.set_unavailable(true);

    session.cancel().await.unwrap();
    assert_eq!(session.status(), UploadStatus::Cancelled);

    storage.set_unavailable(false);
    let url = session.start().await.unwrap().unwrap();
    assert_eq!(url, InMemoryStorage::object_url(&checksum_bytes(b"hello")));
}

#[tokio::test]
async fn cancel_after_completion_is_rejected() {
    let storage = Arc::new(InMemoryStorage::new());
    let session = session_with(&storage, config(), &Recorder::default());
    session.select_file(blob(b"hello"), "a.txt").await.unwrap();
    session.start().await.unwrap();

    assert!(matches!(
        session.cancel().await,
        Err(UploadError::InvalidState {
            operation: "cancel",
            status: UploadStatus::Completed
        })
    ));
}

#[tokio::test]
async fn validation_failure_leaves_state_untouched() {
    let storage = Arc::new(InMemoryStorage::new());
    let cfg = UploadConfig {
        max_file_size: 10,
        ..config()
    };
    let recorder = Recorder::default();
    let session = session_with(&storage, cfg, &recorder);
    session.select_file(blob(b"small"), "small.txt").await.unwrap();
    let before = session.snapshot();

    let err = session
        .select_file(blob(b"much too large"), "large.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    assert_eq!(session.snapshot(), before);

    let err = session.select_file(blob(b"ok"), "   ").await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    assert_eq!(session.snapshot(), before);
    assert_eq!(recorder.statuses(), vec![UploadStatus::Idle]);
}

#[tokio::test(start_paused = true)]
async fn hash_timeout_fails_without_resume() {
    let storage = Arc::new(InMemoryStorage::new());
    let cfg = UploadConfig {
        hash_timeout_ms: 20,
        ..config()
    };
    let recorder = Recorder::default();
    let session = session_with(&storage, cfg, &recorder);
    let open = Arc::new(AtomicBool::new(false));
    let source: Arc<dyn BlobSource> = Arc::new(GatedBlob {
        data: data(8 * CHUNK as usize),
        open: open.clone(),
    });
    session.select_file(source, "stuck.bin").await.unwrap();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    // Let the attempt arm its hash deadline before moving the clock.
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(50)).await;
    let result = task.await.unwrap();
    open.store(true, Ordering::SeqCst);

    let err = result.unwrap_err();
    assert!(matches!(err, UploadError::Hash(HashFailure::Timeout(_))));
    assert_eq!(session.status(), UploadStatus::Failed);
    assert!(!session.can_resume());
    assert_eq!(recorder.errors().len(), 1);
    assert_eq!(storage.upload_calls(), 0);
}

#[tokio::test]
async fn existence_check_failure_is_retried_with_start() {
    let bytes = data(2000);
    let storage = Arc::new(InMemoryStorage::new());
    storage.set_unavailable(true);
    let session = session_with(&storage, config(), &Recorder::default());
    session.select_file(blob(&bytes), "a.bin").await.unwrap();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, UploadError::ExistenceCheck(_)));
    assert!(!session.can_resume());
    assert!(matches!(
        session.resume().await,
        Err(UploadError::InvalidState { .. })
    ));
    let hash = session.content_hash().unwrap();

    storage.set_unavailable(false);
    session.start().await.unwrap();
    assert_eq!(session.status(), UploadStatus::Completed);
    assert_eq!(session.content_hash(), Some(hash));
}

#[tokio::test]
async fn auto_upload_starts_on_selection() {
    let storage = Arc::new(InMemoryStorage::new());
    let cfg = UploadConfig {
        auto_upload: true,
        ..config()
    };
    let session = session_with(&storage, cfg, &Recorder::default());

    let url = session.select_file(blob(b"auto"), "auto.txt").await.unwrap();
    assert_eq!(url, Some(InMemoryStorage::object_url(&checksum_bytes(b"auto"))));
}

#[tokio::test(start_paused = true)]
async fn selecting_while_busy_is_rejected() {
    let bytes = data(8 * CHUNK as usize);
    let storage = Arc::new(InMemoryStorage::new().with_latency(Duration::from_millis(30)));
    let session = session_with(&storage, config(), &Recorder::default());
    session.select_file(blob(&bytes), "a.bin").await.unwrap();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    wait_until(|| session.status() == UploadStatus::Uploading).await;

    let err = session.select_file(blob(b"other"), "b.bin").await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::InvalidState {
            operation: "select_file",
            ..
        }
    ));
    assert!(task.await.unwrap().unwrap().is_some());
}

#[tokio::test]
async fn uploads_a_file_from_disk() {
    let bytes = data(3 * CHUNK as usize + 17);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &bytes).unwrap();

    let storage = Arc::new(InMemoryStorage::new());
    let session = session_with(&storage, config(), &Recorder::default());
    let source: Arc<dyn BlobSource> = Arc::new(FileBlob::open(file.path()).unwrap());
    session.select_file(source, "notes.txt").await.unwrap();

    let url = session.start().await.unwrap().unwrap();
    let hash = checksum_bytes(&bytes);
    assert_eq!(url, InMemoryStorage::object_url(&hash));
    assert_eq!(storage.object(&hash).unwrap(), bytes);
}
