//! Message body subsystem.
//!
//! # Data Flow
//! ```text
//! wire body (chunk stream)
//!     → branch.rs (trunk + checkpoint stack, records while a branch is open)
//!     → spill.rs (recording kept in memory, then in a temporary file)
//!     → codec.rs (Content-Encoding, then charset) on get_bytes/get_string/get_json
//!     → cached decoded forms, invalidated by set_* and close
//! ```
//!
//! # Design Decisions
//! - Convenience readers push a branch, drain, and pop, so the read position
//!   seen by later consumers is unchanged
//! - Writers replace the trunk and keep `Content-Length`/`Content-Type` of the
//!   owning message consistent with the new bytes
//! - `pop` without a matching `push` is an error, not a no-op

pub mod branch;
pub mod codec;
pub mod spill;

use std::fmt;
use std::io;

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;

pub use branch::{BodyStream, BranchingStream};
pub use codec::Charset;
pub use spill::SpillLimits;

/// Errors raised while reading, decoding or branching an entity.
#[derive(Debug, Error)]
pub enum EntityError {
    /// The entity was closed and has no trunk to branch from.
    #[error("entity is closed")]
    Closed,

    /// `pop` was called with no open branch.
    #[error("branch stack underflow: pop without matching push")]
    BranchUnderflow,

    /// Buffered content outgrew the configured file limit.
    #[error("entity buffer exceeded {limit} bytes")]
    Overflow { limit: u64 },

    /// Unknown charset or content coding.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Reading the body failed, or its content could not be parsed.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
}

/// The body of a request or response.
pub struct Entity {
    stream: BranchingStream,
    limits: SpillLimits,
    closed: bool,
    bytes: Option<Bytes>,
    string: Option<(Charset, String)>,
    json: Option<serde_json::Value>,
}

impl Entity {
    /// An entity with no content.
    pub fn empty() -> Self {
        Self::with_stream(None, SpillLimits::default())
    }

    /// An entity over a chunk stream, buffering branches within `limits`.
    pub fn from_stream(source: BodyStream, limits: SpillLimits) -> Self {
        Self::with_stream(Some(source), limits)
    }

    /// An entity over in-memory bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::with_stream(Some(once(bytes.into())), SpillLimits::default())
    }

    fn with_stream(source: Option<BodyStream>, limits: SpillLimits) -> Self {
        let stream = match source {
            Some(source) => BranchingStream::new(source, limits),
            None => BranchingStream::empty(limits),
        };
        Self {
            stream,
            limits,
            closed: false,
            bytes: None,
            string: None,
            json: None,
        }
    }

    /// Open a branch at the current read position.
    pub fn push(&mut self) -> Result<usize, EntityError> {
        if self.closed {
            return Err(EntityError::Closed);
        }
        Ok(self.stream.push())
    }

    /// Close the innermost branch and rewind to its branch point.
    pub fn pop(&mut self) -> Result<usize, EntityError> {
        self.stream.pop()
    }

    /// Number of open branches.
    pub fn depth(&self) -> usize {
        self.stream.depth()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read the next raw chunk from the current head.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, EntityError> {
        self.stream.read_chunk().await
    }

    /// The raw (still encoded) bytes from the current position, leaving the
    /// position untouched.
    pub async fn get_raw_bytes(&mut self) -> Result<Bytes, EntityError> {
        if self.closed {
            return Ok(Bytes::new());
        }
        self.push()?;
        let drained = self.stream.read_to_end().await;
        self.stream.pop()?;
        drained
    }

    /// The body with `Content-Encoding` removed.
    pub async fn get_bytes(&mut self, headers: &HeaderMap) -> Result<Bytes, EntityError> {
        if let Some(bytes) = &self.bytes {
            return Ok(bytes.clone());
        }
        let raw = self.get_raw_bytes().await?;
        let decoded = codec::decode_content(headers, raw)?;
        self.bytes = Some(decoded.clone());
        Ok(decoded)
    }

    /// The decoded body as text, using `charset` or the one named by
    /// `Content-Type` (ISO-8859-1 when neither is set).
    pub async fn get_string(
        &mut self,
        headers: &HeaderMap,
        charset: Option<Charset>,
    ) -> Result<String, EntityError> {
        let charset = codec::resolve_charset(headers, charset)?;
        if let Some((cached_charset, text)) = &self.string {
            if *cached_charset == charset {
                return Ok(text.clone());
            }
        }
        let bytes = self.get_bytes(headers).await?;
        let text = charset.decode(&bytes);
        self.string = Some((charset, text.clone()));
        Ok(text)
    }

    /// The decoded body parsed as JSON.
    pub async fn get_json(&mut self, headers: &HeaderMap) -> Result<serde_json::Value, EntityError> {
        if let Some(json) = &self.json {
            return Ok(json.clone());
        }
        let charset = codec::content_type_charset(headers)?.unwrap_or(Charset::Utf8);
        let text = self.get_string(headers, Some(charset)).await?;
        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| EntityError::Io(io::Error::from(e)))?;
        self.json = Some(json.clone());
        Ok(json)
    }

    /// Replace the content with `bytes` and set `Content-Length`.
    pub fn set_bytes(&mut self, headers: &mut HeaderMap, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        self.replace_trunk(bytes);
    }

    /// Replace the content with `text`, encoded with the `Content-Type` charset.
    pub fn set_string(&mut self, headers: &mut HeaderMap, text: &str) -> Result<(), EntityError> {
        let charset = codec::resolve_charset(headers, None)?;
        self.set_bytes(headers, charset.encode(text));
        Ok(())
    }

    /// Replace the content with serialized JSON and set `Content-Type`.
    pub fn set_json(
        &mut self,
        headers: &mut HeaderMap,
        value: &serde_json::Value,
    ) -> Result<(), EntityError> {
        let body = serde_json::to_vec(value).map_err(|e| EntityError::Io(io::Error::from(e)))?;
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        self.set_bytes(headers, body);
        self.json = Some(value.clone());
        Ok(())
    }

    /// Release the trunk and every branch; reads return end of stream.
    pub fn close(&mut self) {
        self.stream.close();
        self.closed = true;
        self.invalidate();
    }

    /// An independent entity holding the raw bytes from the current position.
    pub async fn try_copy(&mut self) -> Result<Entity, EntityError> {
        let raw = self.get_raw_bytes().await?;
        Ok(Entity::with_stream(Some(once(raw)), self.limits))
    }

    /// Consume the entity as a chunk stream starting at the current position.
    pub fn into_stream(self) -> BodyStream {
        stream::unfold(Some(self.stream), |state| async move {
            let mut stream = state?;
            match stream.read_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(stream))),
                Ok(None) => None,
                Err(EntityError::Io(e)) => Some((Err(e), None)),
                Err(e) => Some((Err(io::Error::other(e)), None)),
            }
        })
        .boxed()
    }

    fn replace_trunk(&mut self, bytes: Bytes) {
        self.stream = BranchingStream::new(once(bytes), self.limits);
        self.closed = false;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.bytes = None;
        self.string = None;
        self.json = None;
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("stream", &self.stream)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn once(bytes: Bytes) -> BodyStream {
    stream::iter([Ok::<_, io::Error>(bytes)]).boxed()
}
