//! Incremental decoding of message bodies.
//!
//! A [`BodyDecoder`] is built once per message from the framing hints of its
//! parsed head, fed raw transport bytes in whatever slices they arrive in,
//! and forwards the decoded body to a [`Payload`] sink. It reports when the
//! body is complete together with any bytes that belong to the next message.

use std::fmt;
use std::mem;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::proto::h1::decompress::DecompressBuffer;
use crate::proto::ContentCoding;

use self::Kind::{Chunked, Empty, Eof, Length};

/// Framing hints for one message body, taken from its parsed head.
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyConfig<'a> {
    /// Value of `Content-Length`, when present.
    pub length: Option<u64>,
    /// Whether `Transfer-Encoding` included `chunked`.
    pub chunked: bool,
    /// Content coding to decode, when advertised and supported.
    pub compression: Option<ContentCoding>,
    /// Response status code; requests leave this unset.
    pub status: Option<u16>,
    /// Request method; responses leave this unset.
    pub method: Option<&'a str>,
    /// Whether a length-less body runs until the connection closes.
    pub read_until_eof: bool,
    /// False when the message cannot carry a body (HEAD response, 304, ...).
    pub response_with_body: bool,
}

impl<'a> BodyConfig<'a> {
    /// Hints for a message that is expected to carry a body.
    pub fn new() -> BodyConfig<'a> {
        BodyConfig {
            response_with_body: true,
            ..BodyConfig::default()
        }
    }
}

/// Decoder for one message body.
pub struct BodyDecoder {
    kind: Kind,
    sink: Box<dyn Payload>,
    done: bool,
}

enum Kind {
    /// No body bytes belong to this message.
    Empty,
    /// A body sized by a `Content-Length` header.
    Length(u64),
    /// A `Transfer-Encoding: chunked` body.
    Chunked {
        state: ChunkedState,
        chunk_len: u64,
        tail: BytesMut,
    },
    /// A body delimited by the connection closing.
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ChunkedState {
    Size,
    Body,
    BodyEnd,
    Trailer,
}

impl BodyDecoder {
    /// Builds the decoder for one message and wires up its sink.
    ///
    /// When the head advertised a supported content coding and the message
    /// can carry a body, the sink is wrapped in a [`DecompressBuffer`]
    /// first. Messages that cannot have a body, or that declare a zero
    /// length, signal EOF immediately and start out done. A request that
    /// requires a body but carries no framing header is logged and treated
    /// as empty.
    pub fn new(sink: Box<dyn Payload>, config: BodyConfig<'_>) -> Result<BodyDecoder> {
        let mut sink = match config.compression {
            Some(coding) if config.response_with_body => {
                Box::new(DecompressBuffer::new(sink, coding)) as Box<dyn Payload>
            }
            _ => sink,
        };

        let (kind, done) = if !config.response_with_body {
            sink.feed_eof()?;
            (Empty, true)
        } else if config.chunked {
            (
                Chunked {
                    state: ChunkedState::Size,
                    chunk_len: 0,
                    tail: BytesMut::new(),
                },
                false,
            )
        } else if let Some(length) = config.length {
            if length == 0 {
                sink.feed_eof()?;
                (Length(0), true)
            } else {
                (Length(length), false)
            }
        } else if config.read_until_eof && config.status != Some(204) {
            (Eof, false)
        } else if matches!(config.method, Some("PUT") | Some("POST")) {
            warn!("Content-Length or Transfer-Encoding header is required");
            sink.feed_eof()?;
            (Empty, true)
        } else {
            (Empty, true)
        };

        Ok(BodyDecoder { kind, sink, done })
    }

    /// Whether the body has been fully decoded.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds transport bytes into the decoder.
    ///
    /// Returns `(done, leftover)`; `leftover` is only non-empty when the
    /// body just completed and `data` ran past its end. Any slicing of the
    /// input stream decodes identically: bytes that cannot be interpreted
    /// yet are carried to the next call. A malformed chunk frame marks the
    /// sink failed and returns a `TransferEncoding` error.
    pub fn feed_data(&mut self, data: Bytes) -> Result<(bool, Bytes)> {
        if self.done {
            return Ok((true, data));
        }

        match self.kind {
            Length(ref mut remaining) => {
                let required = *remaining;
                let len = data.len() as u64;
                if required >= len {
                    *remaining = required - len;
                    self.sink.feed_data(data)?;
                    if *remaining == 0 {
                        self.sink.feed_eof()?;
                        self.done = true;
                        return Ok((true, Bytes::new()));
                    }
                    Ok((false, Bytes::new()))
                } else {
                    *remaining = 0;
                    self.sink.feed_data(data.slice(..required as usize))?;
                    self.sink.feed_eof()?;
                    self.done = true;
                    Ok((true, data.slice(required as usize..)))
                }
            }
            Chunked {
                ref mut state,
                ref mut chunk_len,
                ref mut tail,
            } => {
                let mut chunk = if tail.is_empty() {
                    data
                } else {
                    let mut joined = mem::take(tail);
                    joined.extend_from_slice(&data);
                    joined.freeze()
                };

                while !chunk.is_empty() {
                    match *state {
                        // Read the next chunk size line, dropping any
                        // chunk-extension after `;`.
                        ChunkedState::Size => match find_crlf(&chunk) {
                            Some(pos) => {
                                let line = &chunk[..pos];
                                let size_field = match line.iter().position(|&b| b == b';') {
                                    Some(ext) => &line[..ext],
                                    None => line,
                                };
                                let size = match parse_hex(size_field) {
                                    Some(size) => size,
                                    None => {
                                        let err = Error::new_transfer_encoding()
                                            .with(format!(
                                                "bad chunk size: {:?}",
                                                String::from_utf8_lossy(line)
                                            ));
                                        self.sink.set_exception(&err);
                                        return Err(err);
                                    }
                                };
                                chunk.advance(pos + 2);
                                if size == 0 {
                                    *state = ChunkedState::Trailer;
                                } else {
                                    trace!("incoming chunk: {0:#x} ({0} bytes)", size);
                                    *chunk_len = size;
                                    *state = ChunkedState::Body;
                                }
                            }
                            None => {
                                tail.extend_from_slice(&chunk);
                                return Ok((false, Bytes::new()));
                            }
                        },
                        // Forward chunk data up to the declared size.
                        ChunkedState::Body => {
                            let required = *chunk_len;
                            let len = chunk.len() as u64;
                            if required >= len {
                                *chunk_len = required - len;
                                if *chunk_len == 0 {
                                    *state = ChunkedState::BodyEnd;
                                }
                                self.sink.feed_data(chunk)?;
                                return Ok((false, Bytes::new()));
                            } else {
                                *chunk_len = 0;
                                self.sink.feed_data(chunk.slice(..required as usize))?;
                                chunk.advance(required as usize);
                                *state = ChunkedState::BodyEnd;
                            }
                        }
                        // Toss the CRLF that closes every chunk. It may
                        // arrive in a later buffer than the chunk itself.
                        ChunkedState::BodyEnd => {
                            if chunk.len() < 2 {
                                tail.extend_from_slice(&chunk);
                                return Ok((false, Bytes::new()));
                            }
                            if &chunk[..2] == b"\r\n" {
                                chunk.advance(2);
                                *state = ChunkedState::Size;
                            } else {
                                let err = Error::new_transfer_encoding()
                                    .with("missing CRLF after chunk data");
                                self.sink.set_exception(&err);
                                return Err(err);
                            }
                        }
                        // Discard trailer bytes up to the CRLF terminator.
                        ChunkedState::Trailer => match find_crlf(&chunk) {
                            Some(pos) => {
                                self.sink.feed_eof()?;
                                self.done = true;
                                return Ok((true, chunk.slice(pos + 2..)));
                            }
                            None => {
                                tail.extend_from_slice(&chunk);
                                return Ok((false, Bytes::new()));
                            }
                        },
                    }
                }
                Ok((false, Bytes::new()))
            }
            Eof => {
                self.sink.feed_data(data)?;
                Ok((false, Bytes::new()))
            }
            Empty => Ok((false, Bytes::new())),
        }
    }

    /// Signals that the transport reached EOF.
    ///
    /// Only a read-until-EOF body completes here; the other framings learn
    /// their end from the bytes themselves.
    pub fn feed_eof(&mut self) -> Result<()> {
        if let Eof = self.kind {
            self.sink.feed_eof()?;
            self.done = true;
        }
        Ok(())
    }
}

impl fmt::Debug for BodyDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("BodyDecoder");
        match self.kind {
            Empty => f.field("kind", &"Empty"),
            Length(remaining) => f.field("kind", &format_args!("Length({})", remaining)),
            Chunked { state, chunk_len, ref tail } => f.field(
                "kind",
                &format_args!("Chunked({:?}, len={}, tail={})", state, chunk_len, tail.len()),
            ),
            Eof => f.field("kind", &"Eof"),
        };
        f.field("done", &self.done).finish()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_hex(field: &[u8]) -> Option<u64> {
    let field = crate::headers::trim_ascii_ws(field);
    if field.is_empty() {
        return None;
    }
    let mut size: u64 = 0;
    for &b in field {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b + 10 - b'a',
            b'A'..=b'F' => b + 10 - b'A',
            _ => return None,
        };
        size = size.checked_mul(16)?.checked_add(digit as u64)?;
    }
    Some(size)
}
