#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # h1-wire
//!
//! A fast and correct HTTP/1.x wire codec, meant as the byte-level core of
//! an asynchronous HTTP library.
//!
//! The crate covers exactly the layer between a connection's raw bytes and
//! structured messages:
//!
//! - [`RequestParser`] and [`ResponseParser`] turn pre-split header lines
//!   into a [`RequestHead`] or [`ResponseHead`] with the connection flags
//!   (keep-alive, upgrade, chunking, content coding) already derived.
//! - [`BodyDecoder`] incrementally decodes a message body in any of the
//!   three HTTP/1 framings (fixed length, chunked, read-to-EOF), feeding a
//!   [`Payload`] sink, optionally through a gzip/deflate
//!   [`DecompressBuffer`].
//! - [`MessageWriter`] and [`PayloadWriter`] render heads and emit framed,
//!   optionally compressed body bytes to a [`Transport`], cooperating with
//!   other writers on the same connection through a [`StreamHandle`] and
//!   suspending only at transport backpressure.
//!
//! Reading sockets, splitting header lines, routing, and TLS live in the
//! layers around this crate.

pub use crate::error::{Error, Result};
pub use crate::headers::{HeaderMap, RawHeaders};
pub use crate::payload::{Payload, PayloadBuffer};
pub use crate::proto::h1::{
    BodyConfig, BodyDecoder, DecompressBuffer, MessageWriter, ParseConfig, PayloadWriter,
    RequestParser, ResponseParser,
};
pub use crate::proto::{
    ContentCoding, MessageHead, RawStatus, RequestHead, RequestLine, ResponseHead,
};
pub use crate::stream::{StreamHandle, Transport};
pub use crate::version::HttpVersion;

mod error;
mod headers;
#[cfg(test)]
mod mock;
mod payload;
pub mod proto;
mod stream;
mod version;
