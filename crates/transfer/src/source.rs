use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use quire_protocol::ByteRange;

use crate::TransferError;

/// Random-access, read-only view of the bytes being uploaded.
///
/// Reads are blocking; async callers go through `spawn_blocking`.
pub trait BlobSource: Send + Sync {
    /// Total size in bytes, fixed for the lifetime of the source.
    fn size(&self) -> u64;

    /// Reads exactly the bytes in `range`.
    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, TransferError>;
}

fn check_range(range: ByteRange, size: u64) -> Result<(), TransferError> {
    if range.start > range.end || range.end > size {
        return Err(TransferError::RangeOutOfBounds {
            start: range.start,
            end: range.end,
            size,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FileBlob
// ---------------------------------------------------------------------------

/// A local file opened for ranged reads.
pub struct FileBlob {
    file: Mutex<File>,
    size: u64,
}

impl FileBlob {
    /// Opens `path` and records its current size.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidFile(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            file: Mutex::new(file),
            size: metadata.len(),
        })
    }
}

impl BlobSource for FileBlob {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, TransferError> {
        check_range(range, self.size)?;
        let mut buf = vec![0u8; range.len() as usize];
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(range.start))?;
        // A file truncated after `open` surfaces here as UnexpectedEof.
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// MemoryBlob
// ---------------------------------------------------------------------------

/// An in-memory blob, used for generated content and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlob {
    data: Vec<u8>,
}

impl MemoryBlob {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl BlobSource for MemoryBlob {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: ByteRange) -> Result<Vec<u8>, TransferError> {
        check_range(range, self.size())?;
        Ok(self.data[range.start as usize..range.end as usize].to_vec())
    }
}
