//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have codec `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while handling an HTTP/1 stream.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    Parse(Parse),
    /// A chunked message body had a malformed chunk frame.
    TransferEncoding,
    /// A compressed message body could not be inflated.
    ContentEncoding,
    /// The stream owning the transport went away before hand-off.
    ChannelClosed,
}

#[derive(Debug)]
pub(crate) enum Parse {
    /// Malformed request or response first line.
    StatusLine,
    /// A header name contained forbidden bytes, or a line had no separator.
    Header,
    /// A header field exceeded the configured size limit.
    TooLarge,
}

impl Error {
    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if this error was caused by a malformed first line.
    pub fn is_bad_status_line(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::StatusLine))
    }

    /// Returns true if this error was caused by an invalid header line.
    pub fn is_invalid_header(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::Header))
    }

    /// Returns true if this error was caused by a header field over the limit.
    pub fn is_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::TooLarge))
    }

    /// Returns true if this error was caused by malformed chunked framing.
    pub fn is_transfer_encoding(&self) -> bool {
        matches!(self.inner.kind, Kind::TransferEncoding)
    }

    /// Returns true if this error was caused by undecodable compressed data.
    pub fn is_content_encoding(&self) -> bool {
        matches!(self.inner.kind, Kind::ContentEncoding)
    }

    /// Returns true if the transport owner disappeared during hand-off.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::ChannelClosed)
    }

    /// Consumes the error, returning its cause.
    pub fn into_cause(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.inner.cause
    }

    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn new_status_line() -> Error {
        Error::new(Kind::Parse(Parse::StatusLine))
    }

    pub(crate) fn new_header() -> Error {
        Error::new(Kind::Parse(Parse::Header))
    }

    pub(crate) fn new_too_large() -> Error {
        Error::new(Kind::Parse(Parse::TooLarge))
    }

    pub(crate) fn new_transfer_encoding() -> Error {
        Error::new(Kind::TransferEncoding)
    }

    pub(crate) fn new_content_encoding() -> Error {
        Error::new(Kind::ContentEncoding)
    }

    pub(crate) fn new_channel_closed() -> Error {
        Error::new(Kind::ChannelClosed)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::StatusLine) => "invalid status line",
            Kind::Parse(Parse::Header) => "invalid header",
            Kind::Parse(Parse::TooLarge) => "header field too large",
            Kind::TransferEncoding => "invalid chunked transfer encoding",
            Kind::ContentEncoding => "invalid content encoding",
            Kind::ChannelClosed => "stream closed before transport hand-off",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("h1_wire::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
