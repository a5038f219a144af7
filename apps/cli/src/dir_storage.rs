//! Directory-backed storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! sessions/<session-id>/<index>.part   chunks of unfinished uploads
//! objects/<content-hash>               finalized files
//! ```
//!
//! Chunk parts and objects are written to a `.tmp` sibling first and
//! renamed into place, so a crash never leaves a half-written part that
//! `list_uploaded_chunks` would report.

use std::io::Write;
use std::path::{Path, PathBuf};

use quire_protocol::messages::{
    ChunkAck, ExistsResponse, FinalizeRequest, FinalizeResponse, UploadChunkRequest,
};
use quire_transfer::{checksum_bytes, validate_storage_key};
use quire_upload::{StorageError, StorageFuture, UploadStorage};
use sha2::{Digest, Sha256};

const PART_EXT: &str = "part";

fn unavailable(e: std::io::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

fn checked_key(key: &str) -> Result<&str, StorageError> {
    validate_storage_key(key).map_err(|e| StorageError::Rejected(e.to_string()))?;
    Ok(key)
}

/// Storage that keeps chunks and objects in a local directory.
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// Opens (and creates) the storage rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("sessions"))?;
        std::fs::create_dir_all(root.join("objects"))?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join("sessions").join(checked_key(session_id)?))
    }

    fn object_path(&self, content_hash: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join("objects").join(checked_key(content_hash)?))
    }

    fn url_for(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}

/// Parses `<index>.part`.
fn part_index(name: &str) -> Option<u32> {
    name.strip_suffix(PART_EXT)?.strip_suffix('.')?.parse().ok()
}

fn part_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{index}.{PART_EXT}"))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Concatenates parts `0..total_chunks` into `object`, verifying size and hash.
fn assemble(
    session_dir: &Path,
    object: &Path,
    request: &FinalizeRequest,
) -> Result<(), StorageError> {
    let missing: Vec<u32> = (0..request.total_chunks)
        .filter(|&i| !part_path(session_dir, i).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(StorageError::Rejected(format!("missing chunks {missing:?}")));
    }

    let tmp = tmp_path(object);
    let mut out = std::fs::File::create(&tmp).map_err(unavailable)?;
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    for index in 0..request.total_chunks {
        let data = std::fs::read(part_path(session_dir, index)).map_err(unavailable)?;
        hasher.update(&data);
        out.write_all(&data).map_err(unavailable)?;
        written += data.len() as u64;
    }
    out.sync_all().map_err(unavailable)?;
    drop(out);

    let digest = hex::encode(hasher.finalize());
    if written != request.file_size || digest != request.content_hash {
        let _ = std::fs::remove_file(&tmp);
        return Err(StorageError::Rejected(format!(
            "assembled {written} bytes with hash {digest}, expected {} bytes with hash {}",
            request.file_size, request.content_hash
        )));
    }
    std::fs::rename(&tmp, object).map_err(unavailable)?;
    let _ = std::fs::remove_dir_all(session_dir);
    Ok(())
}

impl UploadStorage for DirStorage {
    fn exists_by_hash<'a>(&'a self, content_hash: &'a str) -> StorageFuture<'a, ExistsResponse> {
        Box::pin(async move {
            let path = self.object_path(content_hash)?;
            let exists = tokio::fs::try_exists(&path).await.map_err(unavailable)?;
            Ok(ExistsResponse {
                exists,
                url: exists.then(|| Self::url_for(&path)),
            })
        })
    }

    fn list_uploaded_chunks<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, Vec<u32>> {
        Box::pin(async move {
            let dir = self.session_dir(session_id)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(unavailable(e)),
            };
            let mut indices = Vec::new();
            while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
                if let Some(index) = entry.file_name().to_str().and_then(part_index) {
                    indices.push(index);
                }
            }
            indices.sort_unstable();
            Ok(indices)
        })
    }

    fn upload_chunk(&self, request: UploadChunkRequest) -> StorageFuture<'_, ChunkAck> {
        Box::pin(async move {
            let dir = self.session_dir(&request.session_id)?;
            if request.payload.len() as u64 != request.range.len() {
                return Err(StorageError::Rejected(format!(
                    "chunk {} carries {} bytes for a {}-byte range",
                    request.index,
                    request.payload.len(),
                    request.range.len()
                )));
            }
            if !request.checksum.is_empty() && checksum_bytes(&request.payload) != request.checksum
            {
                return Err(StorageError::Rejected(format!(
                    "checksum mismatch for chunk {}",
                    request.index
                )));
            }

            tokio::fs::create_dir_all(&dir).await.map_err(unavailable)?;
            let path = part_path(&dir, request.index);
            let tmp = tmp_path(&path);
            tokio::fs::write(&tmp, &request.payload)
                .await
                .map_err(unavailable)?;
            tokio::fs::rename(&tmp, &path).await.map_err(unavailable)?;

            Ok(ChunkAck {
                session_id: request.session_id,
                index: request.index,
                received_bytes: request.payload.len() as u64,
            })
        })
    }

    fn finalize(&self, request: FinalizeRequest) -> StorageFuture<'_, FinalizeResponse> {
        Box::pin(async move {
            let session_dir = self.session_dir(&request.session_id)?;
            let object = self.object_path(&request.content_hash)?;
            let url = Self::url_for(&object);

            tokio::task::spawn_blocking(move || assemble(&session_dir, &object, &request))
                .await
                .map_err(|e| StorageError::Unavailable(format!("assembly task failed: {e}")))??;
            Ok(FinalizeResponse { url })
        })
    }

    fn cancel<'a>(&'a self, session_id: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.session_dir(session_id)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(unavailable(e)),
            }
        })
    }
}
