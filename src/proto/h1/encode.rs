//! Buffered, framed writing of one outbound message body.
//!
//! A [`PayloadWriter`] owns the connection's transport for the duration of
//! one message. It either adopts the transport at construction (stream
//! idle) or parks on a waiter completed when the previous writer releases
//! it; bytes written in the meantime are buffered and flushed on attach.
//! Writing pipelines through optional compression, then content-length
//! truncation, then chunk framing, in that order.

use std::fmt;
use std::io::Write;
use std::mem;

use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use futures_util::future::poll_fn;
use tracing::trace;

use crate::error::{Error, Result};
use crate::proto::ContentCoding;
use crate::stream::{Acquire, StreamHandle, Transport};

/// Buffered bytes over this many trigger a drain on the next `write`.
const DRAIN_BUFFER_SIZE: usize = 64 * 1024;

/// Writes one message's bytes to the stream's transport.
pub struct PayloadWriter<T> {
    stream: StreamHandle<T>,
    transport: TransportState<T>,
    length: Option<u64>,
    chunked: bool,
    compress: Option<Compressor>,
    buffer: Vec<u8>,
    buffer_size: usize,
    output_length: u64,
    eof_written: bool,
    nodelay: Option<bool>,
    cork: Option<bool>,
}

enum TransportState<T> {
    Attached(T),
    Pending(futures_channel::oneshot::Receiver<T>),
    Released,
}

enum Compressor {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
}

impl<T: Transport> PayloadWriter<T> {
    /// Creates a writer, adopting the stream's transport when it is idle or
    /// queueing for it otherwise.
    pub fn new(stream: &StreamHandle<T>) -> PayloadWriter<T> {
        let transport = match stream.acquire() {
            Acquire::Ready(t) => TransportState::Attached(t),
            Acquire::Later(rx) => TransportState::Pending(rx),
        };
        PayloadWriter {
            stream: stream.clone(),
            transport,
            length: None,
            chunked: false,
            compress: None,
            buffer: Vec::new(),
            buffer_size: 0,
            output_length: 0,
            eof_written: false,
            nodelay: None,
            cork: None,
        }
    }

    /// Whether the writer currently owns the transport.
    pub fn has_transport(&self) -> bool {
        matches!(self.transport, TransportState::Attached(_))
    }

    /// Limits the body to `length` bytes; writes past it are dropped.
    pub fn set_length(&mut self, length: Option<u64>) {
        self.length = length;
    }

    /// Remaining advertised body length, if one was set.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Frames every following write as an HTTP/1.1 chunk.
    pub fn enable_chunking(&mut self) {
        self.chunked = true;
    }

    /// Whether chunk framing is enabled.
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Compresses every following write with `coding`.
    ///
    /// `deflate` is the raw stream without a zlib wrapper.
    pub fn enable_compression(&mut self, coding: ContentCoding) {
        self.compress = Some(Compressor::new(coding));
    }

    /// Total bytes queued for the transport so far, headers included.
    pub fn output_length(&self) -> u64 {
        self.output_length
    }

    /// Sets TCP_NODELAY, now or when the transport attaches.
    pub fn set_tcp_nodelay(&mut self, enabled: bool) {
        match self.transport {
            TransportState::Attached(ref mut t) => t.set_nodelay(enabled),
            _ => self.nodelay = Some(enabled),
        }
    }

    /// Sets TCP_CORK, now or when the transport attaches.
    pub fn set_tcp_cork(&mut self, enabled: bool) {
        match self.transport {
            TransportState::Attached(ref mut t) => t.set_cork(enabled),
            _ => self.cork = Some(enabled),
        }
    }

    /// Appends already-framed bytes (the header block) to the pending
    /// buffer without flushing; they go out with the first body write or
    /// drain.
    pub(crate) fn buffer_data(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.buffer_size += data.len();
            self.output_length += data.len() as u64;
            self.buffer.extend_from_slice(data);
        }
    }

    /// Writes a chunk of body data.
    ///
    /// The chunk is compressed and truncated to the advertised length as
    /// configured, chunk-framed when chunking is enabled, and flushed to
    /// the transport when one is attached. Once more than 64 KiB is
    /// pending and `drain` is true, the call waits for the transport to
    /// drain.
    ///
    /// # Panics
    ///
    /// Panics if called after [`write_eof`](Self::write_eof).
    pub async fn write(&mut self, chunk: &[u8], drain: bool) -> Result<()> {
        assert!(!self.eof_written, "write called after write_eof");
        self.poll_attach_now();

        let compressed = match self.compress {
            Some(ref mut c) => {
                let out = c.compress(chunk)?;
                if out.is_empty() {
                    return Ok(());
                }
                Some(out)
            }
            None => None,
        };
        let data: &[u8] = compressed.as_deref().unwrap_or(chunk);
        let data = truncate(&mut self.length, data);
        if data.is_empty() {
            return Ok(());
        }

        if self.chunked {
            let mut framed = Vec::with_capacity(data.len() + 10);
            framed.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
            framed.extend_from_slice(data);
            framed.extend_from_slice(b"\r\n");
            self.write_bytes(&framed);
        } else {
            self.write_bytes(data);
        }

        if self.buffer_size > DRAIN_BUFFER_SIZE && drain {
            self.buffer_size = 0;
            self.drain().await?;
        }
        Ok(())
    }

    /// Finishes the body, optionally writing a final `chunk` first.
    ///
    /// Flushes the compressor's tail, appends the `0\r\n\r\n` terminator
    /// when chunking, drains, and releases the transport back to the
    /// stream. The writer must not be used afterwards.
    pub async fn write_eof(&mut self, chunk: &[u8]) -> Result<()> {
        assert!(!self.eof_written, "write_eof called twice");
        self.poll_attach_now();

        let tail = match self.compress {
            Some(ref mut c) => c.finish(chunk)?,
            None => chunk.to_vec(),
        };
        let tail = truncate(&mut self.length, &tail).to_vec();

        let mut out = Vec::with_capacity(tail.len() + 16);
        if !tail.is_empty() {
            if self.chunked {
                out.extend_from_slice(format!("{:x}\r\n", tail.len()).as_bytes());
                out.extend_from_slice(&tail);
                out.extend_from_slice(b"\r\n");
            } else {
                out.extend_from_slice(&tail);
            }
        }
        if self.chunked {
            out.extend_from_slice(b"0\r\n\r\n");
        }

        self.buffer_data(&out);
        self.drain().await?;
        // Nothing buffered still requires ownership before release.
        self.wait_attach().await?;

        trace!("write_eof: releasing transport, wrote {} bytes", self.output_length);
        if let TransportState::Attached(t) = mem::replace(&mut self.transport, TransportState::Released)
        {
            self.stream.release(t);
        }
        self.eof_written = true;
        Ok(())
    }

    /// Flushes pending bytes and yields until the transport has drained.
    ///
    /// Without a transport this waits for the attach first, so a writer
    /// queued behind another unblocks as soon as the transport is handed
    /// over.
    pub async fn drain(&mut self) -> Result<()> {
        if matches!(self.transport, TransportState::Pending(_)) {
            if self.buffer.is_empty() {
                return Ok(());
            }
            self.wait_attach().await?;
        }
        if let TransportState::Attached(ref mut t) = self.transport {
            if !self.buffer.is_empty() {
                t.write(&self.buffer);
                self.buffer.clear();
            }
            poll_fn(|cx| t.poll_drain(cx)).await;
        }
        Ok(())
    }

    /// Adopts the transport if the hand-off completed since the last call.
    fn poll_attach_now(&mut self) {
        let handed_off = match self.transport {
            TransportState::Pending(ref mut rx) => match rx.try_recv() {
                Ok(Some(t)) => Some(t),
                _ => None,
            },
            _ => None,
        };
        if let Some(t) = handed_off {
            self.attach(t);
        }
    }

    async fn wait_attach(&mut self) -> Result<()> {
        if let TransportState::Pending(_) = self.transport {
            let rx = match mem::replace(&mut self.transport, TransportState::Released) {
                TransportState::Pending(rx) => rx,
                _ => return Ok(()),
            };
            let mut rx = rx;
            let t = (&mut rx)
                .await
                .map_err(|_| Error::new_channel_closed())?;
            self.attach(t);
        }
        Ok(())
    }

    fn attach(&mut self, mut transport: T) {
        trace!("transport attached, {} buffered bytes", self.buffer.len());
        if let Some(enabled) = self.nodelay.take() {
            transport.set_nodelay(enabled);
        }
        if let Some(enabled) = self.cork.take() {
            transport.set_cork(enabled);
        }
        if !self.buffer.is_empty() {
            transport.write(&self.buffer);
            self.buffer.clear();
        }
        self.transport = TransportState::Attached(transport);
    }

    fn write_bytes(&mut self, data: &[u8]) {
        self.buffer_size += data.len();
        self.output_length += data.len() as u64;
        match self.transport {
            TransportState::Attached(ref mut t) => {
                if !self.buffer.is_empty() {
                    t.write(&self.buffer);
                    self.buffer.clear();
                }
                t.write(data);
            }
            _ => self.buffer.extend_from_slice(data),
        }
    }
}

/// Drops the part of `data` past the remaining advertised length.
fn truncate<'a>(length: &mut Option<u64>, data: &'a [u8]) -> &'a [u8] {
    match *length {
        Some(remaining) => {
            let len = data.len() as u64;
            if remaining >= len {
                *length = Some(remaining - len);
                data
            } else {
                *length = Some(0);
                &data[..remaining as usize]
            }
        }
        None => data,
    }
}

impl Compressor {
    fn new(coding: ContentCoding) -> Compressor {
        match coding {
            ContentCoding::Gzip => {
                Compressor::Gzip(GzEncoder::new(Vec::new(), Compression::default()))
            }
            ContentCoding::Deflate => {
                Compressor::Deflate(DeflateEncoder::new(Vec::new(), Compression::default()))
            }
        }
    }

    /// Feeds `data` in and returns whatever compressed bytes are ready,
    /// possibly none.
    fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let result = match self {
            Compressor::Gzip(e) => e.write_all(data).map(|_| mem::take(e.get_mut())),
            Compressor::Deflate(e) => e.write_all(data).map(|_| mem::take(e.get_mut())),
        };
        result.map_err(|e| Error::new_content_encoding().with(e))
    }

    /// Feeds the final `data` and flushes the stream to its end marker.
    fn finish(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let result = match self {
            Compressor::Gzip(e) => e
                .write_all(data)
                .and_then(|_| e.try_finish())
                .map(|_| mem::take(e.get_mut())),
            Compressor::Deflate(e) => e
                .write_all(data)
                .and_then(|_| e.try_finish())
                .map(|_| mem::take(e.get_mut())),
        };
        result.map_err(|e| Error::new_content_encoding().with(e))
    }
}

impl<T> fmt::Debug for PayloadWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadWriter")
            .field("attached", &matches!(self.transport, TransportState::Attached(_)))
            .field("length", &self.length)
            .field("chunked", &self.chunked)
            .field("buffered", &self.buffer.len())
            .field("output_length", &self.output_length)
            .field("eof_written", &self.eof_written)
            .finish()
    }
}
