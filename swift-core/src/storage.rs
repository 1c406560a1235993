//! The storage boundary a `Transfer` writes verified chunks through and
//! reads outgoing chunks from. Real deployments plug in whatever on-disk
//! layout they want (single file, sidecar `.mhash`, multi-file spec); this
//! crate only defines the trait boundary plus an in-memory double used
//! pervasively by tests and a minimal single-file implementation.

use crate::error::StorageError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Positional chunk storage for a single swarm's content.
///
/// Implementations are not required to be thread-safe; a `Transfer` owns
/// its storage handle exclusively and the dispatcher never calls into it
/// from more than one place at a time.
pub trait ChunkStorage: Send {
    fn read_chunk(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError>;
    /// Best-effort total content size, if known (`None` for an open-ended
    /// live stream).
    fn size_hint(&self) -> Option<u64>;

    /// Flushes any buffered state to stable storage, for the `Checkpoint`
    /// control-surface call. The default is a no-op; implementations backed
    /// by an OS file should at least `sync_data`.
    fn checkpoint(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// The primary test double: a growable in-memory buffer. Also suitable for
/// small ephemeral transfers that don't need to survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    buf: Vec<u8>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl ChunkStorage for InMemoryStorage {
    fn read_chunk(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let offset = offset as usize;
        if offset >= self.buf.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.buf.len() - offset);
        buf[..n].copy_from_slice(&self.buf[offset..offset + n]);
        Ok(n)
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let offset = offset as usize;
        let end = offset + data.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.buf.len() as u64)
    }
}

/// A minimal single-file-backed implementation: positional reads/writes
/// into one growing file. Does not implement the multi-file-spec virtual
/// concatenation a directory swarm would need — out of scope here.
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl ChunkStorage for FileStorage {
    fn read_chunk(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        loop {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn size_hint(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    fn checkpoint(&mut self) -> Result<(), StorageError> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_storage_round_trips() {
        let mut storage = InMemoryStorage::new();
        storage.write_chunk(1024, &[9u8; 1024]).unwrap();
        let mut buf = vec![0u8; 1024];
        let n = storage.read_chunk(1024, &mut buf).unwrap();
        assert_eq!(n, 1024);
        assert!(buf.iter().all(|&b| b == 9));
        assert_eq!(storage.size_hint(), Some(2048));
    }

    #[test]
    fn read_past_end_returns_zero() {
        let mut storage = InMemoryStorage::new();
        storage.write_chunk(0, &[1u8; 16]).unwrap();
        let mut buf = vec![0u8; 16];
        let n = storage.read_chunk(100, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn file_storage_round_trips_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.dat");
        let mut storage = FileStorage::open(&path).unwrap();
        storage.write_chunk(0, &[7u8; 64]).unwrap();
        storage.checkpoint().unwrap();

        let mut buf = vec![0u8; 64];
        let n = storage.read_chunk(0, &mut buf).unwrap();
        assert_eq!(n, 64);
        assert!(buf.iter().all(|&b| b == 7));
        assert_eq!(storage.size_hint(), Some(64));
    }
}
