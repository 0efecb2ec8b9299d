//! Bounded temporary storage for branch recordings.
//!
//! # Responsibilities
//! - Keep recorded bytes in memory up to a configurable limit
//! - Move everything to an anonymous temporary file past that limit
//! - Refuse to grow beyond the file limit
//!
//! # Design Decisions
//! - The temporary file is created with `tempfile::tempfile()`, so the OS
//!   removes it as soon as the handle is dropped
//! - Reads are random access by offset; writes are append-only

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::{Bytes, BytesMut};

use crate::entity::EntityError;

/// Default number of bytes held in memory before spilling.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024;

/// Default maximum number of bytes spilled to disk.
pub const DEFAULT_FILE_LIMIT: u64 = 1024 * 1024;

/// Limits applied to a spill buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillLimits {
    /// Bytes kept in memory before switching to a temporary file.
    pub memory_limit: usize,
    /// Maximum total bytes the buffer may hold.
    pub file_limit: u64,
}

impl Default for SpillLimits {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            file_limit: DEFAULT_FILE_LIMIT,
        }
    }
}

enum Storage {
    Memory(BytesMut),
    File { file: File, len: u64 },
}

/// Append-only byte store that overflows from memory into a temporary file.
pub struct SpillBuffer {
    storage: Storage,
    limits: SpillLimits,
}

impl SpillBuffer {
    /// Create an empty buffer with the given limits.
    pub fn new(limits: SpillLimits) -> Self {
        Self {
            storage: Storage::Memory(BytesMut::new()),
            limits,
        }
    }

    /// Number of bytes currently recorded.
    pub fn len(&self) -> u64 {
        match &self.storage {
            Storage::Memory(buf) => buf.len() as u64,
            Storage::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the buffer has moved to disk.
    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::File { .. })
    }

    /// Append bytes, spilling to disk when the memory limit is crossed.
    pub fn append(&mut self, data: &[u8]) -> Result<(), EntityError> {
        let new_len = self.len() + data.len() as u64;
        if new_len > self.limits.file_limit {
            return Err(EntityError::Overflow {
                limit: self.limits.file_limit,
            });
        }

        let spilled = match &mut self.storage {
            Storage::Memory(buf) if new_len <= self.limits.memory_limit as u64 => {
                buf.extend_from_slice(data);
                return Ok(());
            }
            Storage::Memory(buf) => {
                let mut file = tempfile::tempfile()?;
                file.write_all(&buf[..])?;
                tracing::debug!(bytes = buf.len(), "Spilling entity buffer to temporary file");
                Some(Storage::File {
                    file,
                    len: buf.len() as u64,
                })
            }
            Storage::File { .. } => None,
        };
        if let Some(storage) = spilled {
            self.storage = storage;
        }

        if let Storage::File { file, len } = &mut self.storage {
            file.seek(SeekFrom::End(0))?;
            file.write_all(data)?;
            *len += data.len() as u64;
        }
        Ok(())
    }

    /// Read up to `max` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, max: usize) -> Result<Bytes, EntityError> {
        let available = self.len().saturating_sub(offset);
        let count = available.min(max as u64) as usize;
        if count == 0 {
            return Ok(Bytes::new());
        }
        match &mut self.storage {
            Storage::Memory(buf) => {
                let start = offset as usize;
                Ok(Bytes::copy_from_slice(&buf[start..start + count]))
            }
            Storage::File { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                let mut chunk = vec![0u8; count];
                file.read_exact(&mut chunk)?;
                Ok(Bytes::from(chunk))
            }
        }
    }

    /// Discard everything, returning to in-memory storage.
    pub fn clear(&mut self) {
        self.storage = Storage::Memory(BytesMut::new());
    }
}

impl std::fmt::Debug for SpillBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillBuffer")
            .field("len", &self.len())
            .field("spilled", &self.is_spilled())
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_buffer() {
        let mut buf = SpillBuffer::new(SpillLimits::default());
        buf.append(b"hello ").unwrap();
        buf.append(b"world").unwrap();
        assert!(!buf.is_spilled());
        assert_eq!(buf.len(), 11);
        assert_eq!(&buf.read_at(6, 100).unwrap()[..], b"world");
        assert_eq!(&buf.read_at(0, 5).unwrap()[..], b"hello");
        assert!(buf.read_at(11, 10).unwrap().is_empty());
    }

    #[test]
    fn test_spills_past_memory_limit() {
        let mut buf = SpillBuffer::new(SpillLimits {
            memory_limit: 4,
            file_limit: 1024,
        });
        buf.append(b"abc").unwrap();
        assert!(!buf.is_spilled());
        buf.append(b"defgh").unwrap();
        assert!(buf.is_spilled());
        assert_eq!(&buf.read_at(0, 8).unwrap()[..], b"abcdefgh");
        assert_eq!(&buf.read_at(2, 3).unwrap()[..], b"cde");

        buf.clear();
        assert!(!buf.is_spilled());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_file_limit_overflow() {
        let mut buf = SpillBuffer::new(SpillLimits {
            memory_limit: 2,
            file_limit: 4,
        });
        buf.append(b"abcd").unwrap();
        let err = buf.append(b"e").unwrap_err();
        assert!(matches!(err, EntityError::Overflow { limit: 4 }));
    }
}
