//! Content-Encoding and charset handling.
//!
//! # Responsibilities
//! - Undo `Content-Encoding` (identity, gzip, deflate) on read
//! - Pick the charset from `Content-Type`, defaulting to ISO-8859-1
//! - Convert between bytes and strings for the supported charsets
//!
//! # Design Decisions
//! - Encodings are never re-applied on write; callers that need a compressed
//!   body must encode it themselves
//! - Only UTF-8, ISO-8859-1 and US-ASCII are supported; anything else is an
//!   `UnsupportedEncoding` failure rather than a silent fallback

use std::io::Read;

use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::HeaderMap;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};

use crate::entity::EntityError;

/// Charset used when neither the caller nor `Content-Type` names one.
pub const DEFAULT_CHARSET: Charset = Charset::Iso8859_1;

/// Supported character sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Iso8859_1,
    UsAscii,
}

impl Charset {
    /// Resolve a charset label (case-insensitive, common aliases accepted).
    pub fn from_label(label: &str) -> Result<Self, EntityError> {
        match label.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "l1" => Ok(Charset::Iso8859_1),
            "us-ascii" | "ascii" => Ok(Charset::UsAscii),
            other => Err(EntityError::UnsupportedEncoding(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::UsAscii => "US-ASCII",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
            Charset::UsAscii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
        }
    }

    /// Encode, replacing unmappable characters with `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Iso8859_1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Charset::UsAscii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

/// Extract the `charset` parameter of the `Content-Type` header, if any.
pub fn content_type_charset(headers: &HeaderMap) -> Result<Option<Charset>, EntityError> {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    for param in content_type.split(';').skip(1) {
        if let Some((name, value)) = param.split_once('=') {
            if name.trim().eq_ignore_ascii_case("charset") {
                return Charset::from_label(value).map(Some);
            }
        }
    }
    Ok(None)
}

/// Charset for reading: explicit override, then `Content-Type`, then the default.
pub fn resolve_charset(headers: &HeaderMap, explicit: Option<Charset>) -> Result<Charset, EntityError> {
    match explicit {
        Some(charset) => Ok(charset),
        None => Ok(content_type_charset(headers)?.unwrap_or(DEFAULT_CHARSET)),
    }
}

/// Undo every `Content-Encoding` listed on the message, last applied first.
pub fn decode_content(headers: &HeaderMap, raw: Bytes) -> Result<Bytes, EntityError> {
    let mut codings: Vec<String> = headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    codings.reverse();

    let mut body = raw;
    for coding in codings {
        body = match coding.as_str() {
            "identity" => body,
            "gzip" | "x-gzip" => inflate(GzDecoder::new(&body[..]))?,
            "deflate" => inflate(ZlibDecoder::new(&body[..]))?,
            other => return Err(EntityError::UnsupportedEncoding(other.to_string())),
        };
    }
    Ok(body)
}

fn inflate(mut decoder: impl Read) -> Result<Bytes, EntityError> {
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}
