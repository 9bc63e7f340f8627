//! Streaming decompression in front of a payload sink.

use std::fmt;
use std::io::Write;
use std::mem;

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder};

use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::proto::ContentCoding;

/// A [`Payload`] adapter that inflates gzip or deflate bodies.
///
/// Sits between a body decoder and the application sink: compressed bytes
/// are fed in, decompressed bytes come out the other side as they become
/// available. `deflate` means the raw stream without a zlib wrapper, which
/// is what peers actually send.
pub struct DecompressBuffer {
    inner: Box<dyn Payload>,
    decoder: Decoder,
    size: u64,
}

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(DeflateDecoder<Vec<u8>>),
}

impl DecompressBuffer {
    /// Wraps `inner` with streaming decompression for `coding`.
    pub fn new(inner: Box<dyn Payload>, coding: ContentCoding) -> DecompressBuffer {
        let decoder = match coding {
            ContentCoding::Gzip => Decoder::Gzip(GzDecoder::new(Vec::new())),
            ContentCoding::Deflate => Decoder::Deflate(DeflateDecoder::new(Vec::new())),
        };
        DecompressBuffer {
            inner,
            decoder,
            size: 0,
        }
    }

    fn write_input(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.decoder {
            Decoder::Gzip(ref mut d) => d.write_all(data),
            Decoder::Deflate(ref mut d) => d.write_all(data),
        }
    }

    fn finish_input(&mut self) -> std::io::Result<()> {
        match self.decoder {
            Decoder::Gzip(ref mut d) => d.try_finish(),
            Decoder::Deflate(ref mut d) => d.try_finish(),
        }
    }

    fn take_output(&mut self) -> Vec<u8> {
        match self.decoder {
            Decoder::Gzip(ref mut d) => mem::take(d.get_mut()),
            Decoder::Deflate(ref mut d) => mem::take(d.get_mut()),
        }
    }
}

impl Payload for DecompressBuffer {
    fn feed_data(&mut self, data: Bytes) -> Result<()> {
        self.size += data.len() as u64;
        self.write_input(&data)
            .map_err(|e| Error::new_content_encoding().with(e))?;
        let out = self.take_output();
        if !out.is_empty() {
            self.inner.feed_data(Bytes::from(out))?;
        }
        Ok(())
    }

    fn feed_eof(&mut self) -> Result<()> {
        // A stream that never produced input has nothing to verify.
        if self.size > 0 {
            self.finish_input()
                .map_err(|e| Error::new_content_encoding().with(e))?;
            let out = self.take_output();
            if !out.is_empty() {
                self.inner.feed_data(Bytes::from(out))?;
            }
        }
        self.inner.feed_eof()
    }

    fn set_exception(&mut self, err: &Error) {
        self.inner.set_exception(err);
    }
}

impl fmt::Debug for DecompressBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coding = match self.decoder {
            Decoder::Gzip(_) => "gzip",
            Decoder::Deflate(_) => "deflate",
        };
        f.debug_struct("DecompressBuffer")
            .field("coding", &coding)
            .field("size", &self.size)
            .finish()
    }
}
