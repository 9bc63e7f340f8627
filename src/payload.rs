//! The sink contract decoded body bytes are delivered to.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// Receives decoded body data from a [`BodyDecoder`](crate::BodyDecoder).
///
/// Implementations store or stream bytes onward to the application. A sink
/// sees zero or more `feed_data` calls followed by exactly one `feed_eof`;
/// if the body fails mid-stream, `set_exception` is called before the error
/// is returned to the decoder's caller, so a reader blocked on body bytes
/// observes the failure.
pub trait Payload {
    /// Delivers a non-empty slice of decoded body bytes.
    fn feed_data(&mut self, data: Bytes) -> Result<()>;

    /// Signals that the body is complete.
    fn feed_eof(&mut self) -> Result<()>;

    /// Marks the sink as failed with a framing or decoding error.
    fn set_exception(&mut self, err: &Error);
}

/// An in-memory [`Payload`] sink.
///
/// Cloning yields another handle to the same buffer, so one handle can be
/// given to a decoder while the other is used to inspect what arrived.
#[derive(Clone, Default)]
pub struct PayloadBuffer {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    data: BytesMut,
    eof: bool,
    error: Option<String>,
}

impl PayloadBuffer {
    /// Creates an empty buffer.
    pub fn new() -> PayloadBuffer {
        PayloadBuffer::default()
    }

    /// Copies out everything received so far.
    pub fn data(&self) -> Bytes {
        Bytes::copy_from_slice(&self.shared.lock().unwrap().data)
    }

    /// Whether `feed_eof` has been seen.
    pub fn is_eof(&self) -> bool {
        self.shared.lock().unwrap().eof
    }

    /// The rendering of the error set via `set_exception`, if any.
    pub fn error(&self) -> Option<String> {
        self.shared.lock().unwrap().error.clone()
    }
}

impl Payload for PayloadBuffer {
    fn feed_data(&mut self, data: Bytes) -> Result<()> {
        self.shared.lock().unwrap().data.extend_from_slice(&data);
        Ok(())
    }

    fn feed_eof(&mut self) -> Result<()> {
        self.shared.lock().unwrap().eof = true;
        Ok(())
    }

    fn set_exception(&mut self, err: &Error) {
        self.shared.lock().unwrap().error = Some(err.to_string());
    }
}

impl fmt::Debug for PayloadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock().unwrap();
        f.debug_struct("PayloadBuffer")
            .field("len", &shared.data.len())
            .field("eof", &shared.eof)
            .field("error", &shared.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_collects_until_eof() {
        let buf = PayloadBuffer::new();
        let mut sink = buf.clone();
        sink.feed_data(Bytes::from_static(b"hello ")).unwrap();
        sink.feed_data(Bytes::from_static(b"world")).unwrap();
        assert!(!buf.is_eof());
        sink.feed_eof().unwrap();
        assert_eq!(buf.data().as_ref(), b"hello world");
        assert!(buf.is_eof());
        assert!(buf.error().is_none());
    }

    #[test]
    fn exception_is_observable() {
        let buf = PayloadBuffer::new();
        let mut sink = buf.clone();
        sink.set_exception(&Error::new_transfer_encoding());
        assert_eq!(
            buf.error().unwrap(),
            "invalid chunked transfer encoding"
        );
    }
}
