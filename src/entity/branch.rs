//! Branching byte stream with a LIFO checkpoint stack.
//!
//! # Responsibilities
//! - Pull chunks from the trunk source on demand
//! - Record everything read while at least one branch is open
//! - Rewind to the branch point when the branch is popped
//!
//! # Design Decisions
//! - A branch is a saved read position; `pop` restores the position saved by
//!   the matching `push`, so stack discipline is enforced by the stack itself
//! - Recorded bytes live in a [`SpillBuffer`] addressed by absolute stream
//!   offset; the buffer is cleared once no branch is open and the reader has
//!   caught up with the recording
//! - Not thread-safe by intent: one request flow owns the stream at a time

use std::fmt;
use std::io;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::entity::spill::{SpillBuffer, SpillLimits};
use crate::entity::EntityError;

/// Source of raw body chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// Largest chunk handed out when replaying recorded bytes.
const REPLAY_CHUNK: usize = 16 * 1024;

/// A readable trunk plus a stack of branch points.
pub struct BranchingStream {
    source: Option<BodyStream>,
    record: SpillBuffer,
    /// Absolute stream offset of the first recorded byte.
    record_base: u64,
    /// Absolute stream offset of the next byte handed out.
    position: u64,
    branches: Vec<u64>,
    exhausted: bool,
}

impl BranchingStream {
    /// Wrap a chunk stream.
    pub fn new(source: BodyStream, limits: SpillLimits) -> Self {
        Self {
            source: Some(source),
            record: SpillBuffer::new(limits),
            record_base: 0,
            position: 0,
            branches: Vec::new(),
            exhausted: false,
        }
    }

    /// A stream with no content.
    pub fn empty(limits: SpillLimits) -> Self {
        Self {
            source: None,
            record: SpillBuffer::new(limits),
            record_base: 0,
            position: 0,
            branches: Vec::new(),
            exhausted: true,
        }
    }

    /// Number of open branches.
    pub fn depth(&self) -> usize {
        self.branches.len()
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Open a branch at the current position and return the new depth.
    pub fn push(&mut self) -> usize {
        self.branches.push(self.position);
        self.branches.len()
    }

    /// Close the innermost branch, rewinding to where it was opened.
    pub fn pop(&mut self) -> Result<usize, EntityError> {
        let saved = self.branches.pop().ok_or(EntityError::BranchUnderflow)?;
        self.position = saved;
        self.compact();
        Ok(self.branches.len())
    }

    /// Read the next chunk, or `None` at end of stream.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, EntityError> {
        let record_end = self.record_base + self.record.len();
        if self.position < record_end {
            let chunk = self
                .record
                .read_at(self.position - self.record_base, REPLAY_CHUNK)?;
            self.position += chunk.len() as u64;
            self.compact();
            return Ok(Some(chunk));
        }

        if self.exhausted {
            return Ok(None);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };

        loop {
            match source.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.position += chunk.len() as u64;
                    if self.branches.is_empty() {
                        self.record.clear();
                        self.record_base = self.position;
                    } else {
                        self.record.append(&chunk)?;
                    }
                    return Ok(Some(chunk));
                }
                Some(Err(e)) => return Err(EntityError::Io(e)),
                None => {
                    self.exhausted = true;
                    self.source = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Read everything from the current position to end of stream.
    pub async fn read_to_end(&mut self) -> Result<Bytes, EntityError> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(collected))
    }

    /// Drop the source, the recording and every branch.
    pub fn close(&mut self) {
        self.source = None;
        self.record.clear();
        self.branches.clear();
        self.exhausted = true;
        self.record_base = self.position;
    }

    fn compact(&mut self) {
        let record_end = self.record_base + self.record.len();
        if self.branches.is_empty() && self.position >= record_end && !self.record.is_empty() {
            self.record.clear();
            self.record_base = self.position;
        }
    }
}

impl fmt::Debug for BranchingStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchingStream")
            .field("position", &self.position)
            .field("depth", &self.branches.len())
            .field("record", &self.record)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunked(parts: &[&'static [u8]]) -> BranchingStream {
        let chunks: Vec<Result<Bytes, io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        BranchingStream::new(stream::iter(chunks).boxed(), SpillLimits::default())
    }

    #[tokio::test]
    async fn test_branch_rewinds_parent() {
        let mut s = chunked(&[b"ab", b"cd", b"ef"]);
        assert_eq!(&s.read_chunk().await.unwrap().unwrap()[..], b"ab");

        s.push();
        assert_eq!(&s.read_to_end().await.unwrap()[..], b"cdef");
        s.pop().unwrap();

        assert_eq!(s.position(), 2);
        assert_eq!(&s.read_to_end().await.unwrap()[..], b"cdef");
        assert!(s.read_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nested_branches() {
        let mut s = chunked(&[b"12", b"34", b"56"]);
        s.push();
        s.read_chunk().await.unwrap();
        s.push();
        assert_eq!(&s.read_to_end().await.unwrap()[..], b"3456");
        assert_eq!(s.pop().unwrap(), 1);
        // Back at the inner branch point.
        assert_eq!(&s.read_chunk().await.unwrap().unwrap()[..], b"34");
        assert_eq!(s.pop().unwrap(), 0);
        assert_eq!(&s.read_to_end().await.unwrap()[..], b"123456");
    }

    #[tokio::test]
    async fn test_pop_without_push_is_rejected() {
        let mut s = chunked(&[b"x"]);
        assert!(matches!(s.pop(), Err(EntityError::BranchUnderflow)));
    }

    #[tokio::test]
    async fn test_branch_spills_to_disk() {
        let chunks: Vec<Result<Bytes, io::Error>> = (0..8)
            .map(|i| Ok(Bytes::from(vec![b'a' + i as u8; 1024])))
            .collect();
        let limits = SpillLimits {
            memory_limit: 2048,
            file_limit: 64 * 1024,
        };
        let mut s = BranchingStream::new(stream::iter(chunks).boxed(), limits);
        s.push();
        let first = s.read_to_end().await.unwrap();
        assert_eq!(first.len(), 8 * 1024);
        assert!(s.record.is_spilled());
        s.pop().unwrap();
        let second = s.read_to_end().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_source_error_surfaces() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut s = BranchingStream::new(stream::iter(chunks).boxed(), SpillLimits::default());
        assert!(s.read_chunk().await.unwrap().is_some());
        assert!(matches!(s.read_chunk().await, Err(EntityError::Io(_))));
    }
}
