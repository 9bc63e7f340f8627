//! Pieces pertaining to the HTTP message protocol.

use crate::headers::{HeaderMap, RawHeaders};
use crate::version::HttpVersion;

pub mod h1;

/// An incoming message head: request/status line, headers, and the
/// connection decisions derived from them.
#[derive(Debug)]
pub struct MessageHead<S> {
    /// HTTP version of the message.
    pub version: HttpVersion,
    /// Subject (request line or status line) of the incoming message.
    pub subject: S,
    /// Headers of the incoming message.
    pub headers: HeaderMap,
    /// Every header exactly as received, names canonicalized.
    pub raw_headers: RawHeaders,
    /// Whether the connection must close after this message.
    pub should_close: bool,
    /// Content coding advertised by `Content-Encoding`, if supported.
    pub compression: Option<ContentCoding>,
    /// Whether `Connection: upgrade` was present.
    pub upgrade: bool,
    /// Whether `Transfer-Encoding` includes `chunked`.
    pub chunked: bool,
}

/// An incoming request message.
pub type RequestHead = MessageHead<RequestLine>;

/// An incoming response message.
pub type ResponseHead = MessageHead<RawStatus>;

/// The method and target of a request line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestLine {
    /// Request method, upper-cased.
    pub method: String,
    /// Request target exactly as it appeared on the wire.
    pub path: String,
}

/// The status code and reason phrase of a status line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawStatus {
    /// Status code, in `100..=999`.
    pub code: u16,
    /// Reason phrase; empty when the peer sent none.
    pub reason: String,
}

/// A content coding the codec can decode and encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentCoding {
    /// RFC 1952 gzip wrapping of deflate.
    Gzip,
    /// Raw deflate without a zlib wrapper.
    Deflate,
}

impl ContentCoding {
    /// Maps a lower-cased `Content-Encoding` value to a supported coding.
    pub(crate) fn from_value(value: &[u8]) -> Option<ContentCoding> {
        if value.eq_ignore_ascii_case(b"gzip") {
            Some(ContentCoding::Gzip)
        } else if value.eq_ignore_ascii_case(b"deflate") {
            Some(ContentCoding::Deflate)
        } else {
            None
        }
    }
}
