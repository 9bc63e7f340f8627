//! Building and sending message heads.
//!
//! A [`MessageWriter`] collects outbound headers, makes the
//! connection-level decisions (keep-alive, upgrade, chunking), renders the
//! status line and header block, and then behaves as the payload writer for
//! the body. Requests and responses share everything but the first line and
//! the autochunk policy.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::headers::{value_contains_ignore_case, HeaderMap};
use crate::proto::h1::date;
use crate::proto::h1::encode::PayloadWriter;
use crate::proto::ContentCoding;
use crate::stream::{StreamHandle, Transport};
use crate::version::HttpVersion;

const AVERAGE_HEADER_SIZE: usize = 30; // totally scientific

const SERVER_SOFTWARE: &str = concat!("h1-wire/", env!("CARGO_PKG_VERSION"));

/// Writes one outbound request or response, head and body.
pub struct MessageWriter<T> {
    writer: PayloadWriter<T>,
    kind: Kind,
    version: HttpVersion,
    headers: HeaderMap,
    closing: bool,
    keepalive: Option<bool>,
    upgrade: bool,
    websocket: bool,
    has_chunked_hdr: bool,
    headers_sent: bool,
    hop_headers: &'static [&'static str],
}

enum Kind {
    Request { method: String, path: String },
    Response { status: u16, reason: String },
}

impl<T: Transport> MessageWriter<T> {
    /// Creates a request writer.
    ///
    /// Versions before HTTP/1.0 cannot keep the connection alive, so they
    /// start out closing.
    pub fn request(
        stream: &StreamHandle<T>,
        method: &str,
        path: &str,
        version: HttpVersion,
        close: bool,
    ) -> MessageWriter<T> {
        let close = close || version < HttpVersion::HTTP_10;
        MessageWriter::new(
            stream,
            Kind::Request {
                method: method.to_owned(),
                path: path.to_owned(),
            },
            version,
            close,
        )
    }

    /// Creates a response writer.
    ///
    /// A missing `reason` falls back to the canonical phrase for `status`,
    /// or the bare code when there is none.
    pub fn response(
        stream: &StreamHandle<T>,
        status: u16,
        version: HttpVersion,
        close: bool,
        reason: Option<&str>,
    ) -> MessageWriter<T> {
        let reason = match reason {
            Some(reason) => reason.to_owned(),
            None => canonical_reason(status)
                .map(str::to_owned)
                .unwrap_or_else(|| status.to_string()),
        };
        MessageWriter::new(stream, Kind::Response { status, reason }, version, close)
    }

    fn new(stream: &StreamHandle<T>, kind: Kind, version: HttpVersion, close: bool) -> MessageWriter<T> {
        MessageWriter {
            writer: PayloadWriter::new(stream),
            kind,
            version,
            headers: HeaderMap::new(),
            closing: close,
            keepalive: None,
            upgrade: false,
            websocket: false,
            has_chunked_hdr: false,
            headers_sent: false,
            hop_headers: &[],
        }
    }

    /// The message's HTTP version.
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Response status code, when this is a response writer.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            Kind::Response { status, .. } => Some(status),
            Kind::Request { .. } => None,
        }
    }

    /// Response reason phrase, when this is a response writer.
    pub fn reason(&self) -> Option<&str> {
        match self.kind {
            Kind::Response { ref reason, .. } => Some(reason),
            Kind::Request { .. } => None,
        }
    }

    /// Request method, when this is a request writer.
    pub fn method(&self) -> Option<&str> {
        match self.kind {
            Kind::Request { ref method, .. } => Some(method),
            Kind::Response { .. } => None,
        }
    }

    /// Request target, when this is a request writer.
    pub fn path(&self) -> Option<&str> {
        match self.kind {
            Kind::Request { ref path, .. } => Some(path),
            Kind::Response { .. } => None,
        }
    }

    /// The outbound headers collected so far.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether `send_headers` has run.
    pub fn is_headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Whether a `Connection: upgrade` header was added.
    pub fn is_upgrade(&self) -> bool {
        self.upgrade
    }

    /// Whether an `Upgrade: websocket` header was added.
    pub fn is_websocket(&self) -> bool {
        self.websocket
    }

    /// Total bytes handed to the transport so far, head included.
    pub fn body_length(&self) -> u64 {
        self.writer.output_length()
    }

    /// Replaces the set of hop-by-hop headers dropped from the message.
    pub fn set_hop_headers(&mut self, headers: &'static [&'static str]) {
        self.hop_headers = headers;
    }

    /// Marks the connection as closing after this message.
    pub fn force_close(&mut self) {
        self.closing = true;
        self.keepalive = Some(false);
    }

    /// Whether the connection stays open after this message.
    ///
    /// An explicit `Connection` header wins; otherwise versions before 1.0
    /// never keep alive, 1.0 only with `Connection: keep-alive`, and 1.1
    /// unless the message is closing.
    pub fn keep_alive(&self) -> bool {
        if let Some(keepalive) = self.keepalive {
            return keepalive;
        }
        if self.version < HttpVersion::HTTP_10 {
            false
        } else if self.version == HttpVersion::HTTP_10 {
            self.headers
                .get("Connection")
                .map_or(false, |v| v.as_ref() == b"keep-alive")
        } else {
            !self.closing
        }
    }

    /// Frames the body as chunks.
    pub fn enable_chunking(&mut self) {
        self.writer.enable_chunking();
    }

    /// Compresses the body with `coding`.
    pub fn enable_compression(&mut self, coding: ContentCoding) {
        self.writer.enable_compression(coding);
    }

    /// Adds one header, interpreting the connection-control ones.
    ///
    /// `Content-Length` sets the writer's length limit, `Transfer-Encoding`
    /// records explicit chunking, `Connection` and `Upgrade` are folded
    /// into flags (`Connection` is re-derived when the head is sent), and
    /// hop-by-hop headers are dropped.
    ///
    /// # Panics
    ///
    /// Panics if the head has already been sent.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<()> {
        assert!(!self.headers_sent, "headers have been sent already");
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::new_header().with(format!("header name {:?}", name)));
        }
        let value = value.trim();

        if name.eq_ignore_ascii_case("Content-Length") {
            let length = value.parse::<u64>().map_err(|_| {
                Error::new_header().with(format!("invalid Content-Length {:?}", value))
            })?;
            self.writer.set_length(Some(length));
        }
        if name.eq_ignore_ascii_case("Transfer-Encoding") {
            self.has_chunked_hdr = value.eq_ignore_ascii_case("chunked");
        }

        if name.eq_ignore_ascii_case("Connection") {
            let value = value.as_bytes();
            if value_contains_ignore_case(value, "upgrade") {
                self.upgrade = true;
            } else if value_contains_ignore_case(value, "close") {
                self.keepalive = Some(false);
            } else if value_contains_ignore_case(value, "keep-alive") {
                self.keepalive = Some(true);
            }
        } else if name.eq_ignore_ascii_case("Upgrade") {
            if value_contains_ignore_case(value.as_bytes(), "websocket") {
                self.websocket = true;
            }
            self.headers.insert(copied(name), copied(value));
        } else if !self
            .hop_headers
            .iter()
            .any(|hop| hop.eq_ignore_ascii_case(name))
        {
            self.headers.append(copied(name), copied(value));
        }
        Ok(())
    }

    /// Adds several headers; see [`add_header`](Self::add_header).
    pub fn add_headers<'a, I>(&mut self, headers: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            self.add_header(name, value)?;
        }
        Ok(())
    }

    /// Renders the status line and header block and buffers them for the
    /// first body write.
    ///
    /// Enables chunking when the message declared it or qualifies for
    /// autochunking, and derives the outgoing `Connection` header from the
    /// upgrade/keep-alive state. Responses get `Date` and `Server` when
    /// absent.
    ///
    /// # Panics
    ///
    /// Panics when called a second time.
    pub fn send_headers(&mut self) {
        assert!(!self.headers_sent, "headers have been sent already");
        self.headers_sent = true;

        // Chunked framing is for HTTP/1.1 peers with no Content-Length,
        // and never for bodiless statuses.
        if !self.writer.is_chunked() && (self.has_chunked_hdr || self.autochunked()) {
            self.writer.enable_chunking();
        }
        if self.writer.is_chunked() {
            self.headers.insert("Transfer-Encoding", "chunked");
        }

        self.add_default_headers();

        let mut buf = Vec::with_capacity(30 + self.headers.len() * AVERAGE_HEADER_SIZE);
        self.extend_status_line(&mut buf);
        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name);
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value);
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");

        trace!("send_headers: {} bytes, chunked={}", buf.len(), self.writer.is_chunked());
        self.writer.buffer_data(&buf);
    }

    /// Writes a chunk of body data; see [`PayloadWriter::write`].
    pub async fn write(&mut self, chunk: &[u8], drain: bool) -> Result<()> {
        self.writer.write(chunk, drain).await
    }

    /// Finishes the message; see [`PayloadWriter::write_eof`].
    pub async fn write_eof(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer.write_eof(chunk).await
    }

    /// Flushes and waits out transport backpressure.
    pub async fn drain(&mut self) -> Result<()> {
        self.writer.drain().await
    }

    /// Sets TCP_NODELAY on the transport.
    pub fn set_tcp_nodelay(&mut self, enabled: bool) {
        self.writer.set_tcp_nodelay(enabled);
    }

    /// Sets TCP_CORK on the transport.
    pub fn set_tcp_cork(&mut self, enabled: bool) {
        self.writer.set_tcp_cork(enabled);
    }

    fn autochunked(&self) -> bool {
        if self.writer.length().is_some() {
            return false;
        }
        match self.kind {
            Kind::Request { .. } => self.version >= HttpVersion::HTTP_11,
            Kind::Response { status, .. } => {
                self.version >= HttpVersion::HTTP_11 && status != 204 && status != 304
            }
        }
    }

    fn add_default_headers(&mut self) {
        let connection = if self.upgrade {
            Some("Upgrade")
        } else if self.keepalive.unwrap_or(!self.closing) {
            if self.version == HttpVersion::HTTP_10 {
                Some("keep-alive")
            } else {
                None
            }
        } else if self.version == HttpVersion::HTTP_11 {
            Some("close")
        } else {
            None
        };
        if let Some(value) = connection {
            debug!("connection header: {}", value);
            self.headers.insert("Connection", value);
        }

        if let Kind::Response { .. } = self.kind {
            if !self.headers.contains_key("Date") {
                self.headers.append("Date", date::value());
            }
            if !self.headers.contains_key("Server") {
                self.headers.append("Server", SERVER_SOFTWARE);
            }
        }
    }

    fn extend_status_line(&self, dst: &mut Vec<u8>) {
        let mut int_buf = itoa::Buffer::new();
        match self.kind {
            Kind::Request {
                ref method,
                ref path,
            } => {
                dst.extend_from_slice(method.as_bytes());
                dst.push(b' ');
                dst.extend_from_slice(path.as_bytes());
                dst.extend_from_slice(b" HTTP/");
                dst.extend_from_slice(int_buf.format(self.version.major).as_bytes());
                dst.push(b'.');
                dst.extend_from_slice(int_buf.format(self.version.minor).as_bytes());
                dst.extend_from_slice(b"\r\n");
            }
            Kind::Response { status, ref reason } => {
                dst.extend_from_slice(b"HTTP/");
                dst.extend_from_slice(int_buf.format(self.version.major).as_bytes());
                dst.push(b'.');
                dst.extend_from_slice(int_buf.format(self.version.minor).as_bytes());
                dst.push(b' ');
                dst.extend_from_slice(int_buf.format(status).as_bytes());
                dst.push(b' ');
                dst.extend_from_slice(reason.as_bytes());
                dst.extend_from_slice(b"\r\n");
            }
        }
    }
}

fn copied(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// The canonical reason phrase for well-known status codes.
fn canonical_reason(code: u16) -> Option<&'static str> {
    let reason = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    };
    Some(reason)
}

impl<T> fmt::Debug for MessageWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Request {
                ref method,
                ref path,
            } => format!("Request({} {})", method, path),
            Kind::Response { status, .. } => format!("Response({})", status),
        };
        f.debug_struct("MessageWriter")
            .field("kind", &kind)
            .field("version", &self.version)
            .field("headers_sent", &self.headers_sent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn response(status: u16, version: HttpVersion) -> (MessageWriter<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock.clone());
        (
            MessageWriter::response(&stream, status, version, false, None),
            mock,
        )
    }

    fn request(method: &str, path: &str, version: HttpVersion) -> (MessageWriter<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock.clone());
        (
            MessageWriter::request(&stream, method, path, version, false),
            mock,
        )
    }

    fn head_of(bytes: &[u8]) -> String {
        let end = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("head terminator")
            + 4;
        String::from_utf8(bytes[..end].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_response_status_line_and_defaults() {
        let (mut msg, mock) = response(200, HttpVersion::HTTP_11);
        msg.add_header("Content-Length", "0").unwrap();
        msg.send_headers();
        msg.write_eof(b"").await.unwrap();

        let head = head_of(&mock.written());
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head: {:?}", head);
        assert!(head.contains("Content-Length: 0\r\n"));
        assert!(head.contains("Date: "));
        assert!(head.contains(concat!("Server: h1-wire/", env!("CARGO_PKG_VERSION"))));
        // Keep-alive HTTP/1.1 needs no Connection header.
        assert!(!head.contains("Connection:"));
    }

    #[tokio::test]
    async fn test_response_autochunks_without_content_length() {
        let (mut msg, mock) = response(200, HttpVersion::HTTP_11);
        msg.send_headers();
        msg.write(b"hello", true).await.unwrap();
        msg.write_eof(b"").await.unwrap();

        let written = mock.written();
        let head = head_of(&written);
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(String::from_utf8_lossy(&written).contains("5\r\nhello\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_no_autochunk_for_204_and_304() {
        for status in [204u16, 304] {
            let (mut msg, mock) = response(status, HttpVersion::HTTP_11);
            msg.send_headers();
            msg.write_eof(b"").await.unwrap();
            assert!(
                !head_of(&mock.written()).contains("Transfer-Encoding"),
                "status {}",
                status
            );
        }
    }

    #[tokio::test]
    async fn test_no_autochunk_for_http10() {
        let (mut msg, mock) = response(200, HttpVersion::HTTP_10);
        msg.send_headers();
        msg.write_eof(b"").await.unwrap();
        assert!(!head_of(&mock.written()).contains("Transfer-Encoding"));
    }

    #[tokio::test]
    async fn test_explicit_chunked_header_enables_framing() {
        let (mut msg, mock) = response(200, HttpVersion::HTTP_10);
        msg.add_header("Transfer-Encoding", "chunked").unwrap();
        msg.send_headers();
        msg.write(b"x", true).await.unwrap();
        msg.write_eof(b"").await.unwrap();
        let written = mock.written();
        assert!(String::from_utf8_lossy(&written).contains("1\r\nx\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_content_length_limits_body() {
        let (mut msg, mock) = response(200, HttpVersion::HTTP_11);
        msg.add_header("Content-Length", "3").unwrap();
        msg.send_headers();
        msg.write(b"hello", true).await.unwrap();
        msg.write_eof(b"").await.unwrap();
        let written = mock.written();
        assert!(written.ends_with(b"\r\n\r\nhel"), "written: {:?}", written);
    }

    #[tokio::test]
    async fn test_http10_keep_alive_header() {
        let (mut msg, mock) = response(200, HttpVersion::HTTP_10);
        msg.add_header("Connection", "keep-alive").unwrap();
        msg.add_header("Content-Length", "0").unwrap();
        assert!(msg.keep_alive());
        msg.send_headers();
        msg.write_eof(b"").await.unwrap();
        assert!(head_of(&mock.written()).contains("Connection: keep-alive\r\n"));
    }

    #[tokio::test]
    async fn test_http11_close_header() {
        let (mut msg, mock) = response(200, HttpVersion::HTTP_11);
        msg.force_close();
        msg.add_header("Content-Length", "0").unwrap();
        msg.send_headers();
        msg.write_eof(b"").await.unwrap();
        assert!(head_of(&mock.written()).contains("Connection: close\r\n"));
        assert!(!msg.keep_alive());
    }

    #[tokio::test]
    async fn test_upgrade_connection_header() {
        let (mut msg, mock) = response(101, HttpVersion::HTTP_11);
        msg.add_header("Connection", "upgrade").unwrap();
        msg.add_header("Upgrade", "websocket").unwrap();
        msg.add_header("Content-Length", "0").unwrap();
        assert!(msg.is_upgrade());
        assert!(msg.is_websocket());
        msg.send_headers();
        msg.write_eof(b"").await.unwrap();
        let head = head_of(&mock.written());
        assert!(head.contains("Connection: Upgrade\r\n"));
        assert!(head.contains("Upgrade: websocket\r\n"));
    }

    #[tokio::test]
    async fn test_request_status_line_and_autochunk() {
        let (mut msg, mock) = request("GET", "/where?q=1", HttpVersion::HTTP_11);
        msg.add_header("Host", "example.com").unwrap();
        msg.send_headers();
        msg.write(b"hi", true).await.unwrap();
        msg.write_eof(b"").await.unwrap();

        let written = mock.written();
        let head = head_of(&written);
        assert!(head.starts_with("GET /where?q=1 HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.com\r\n"));
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        // Requests never get Date or Server defaults.
        assert!(!head.contains("Date:"));
        assert!(!head.contains("Server:"));
    }

    #[test]
    fn test_keep_alive_law() {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock);

        let msg = MessageWriter::<MockTransport>::request(
            &stream,
            "GET",
            "/",
            HttpVersion::new(0, 9),
            false,
        );
        assert!(!msg.keep_alive());

        let msg = MessageWriter::<MockTransport>::response(
            &stream,
            200,
            HttpVersion::HTTP_10,
            false,
            None,
        );
        assert!(!msg.keep_alive());

        let msg = MessageWriter::<MockTransport>::response(
            &stream,
            200,
            HttpVersion::HTTP_11,
            false,
            None,
        );
        assert!(msg.keep_alive());
    }

    #[test]
    fn test_default_reason_phrases() {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock);
        let msg =
            MessageWriter::<MockTransport>::response(&stream, 404, HttpVersion::HTTP_11, false, None);
        assert_eq!(msg.reason(), Some("Not Found"));
        let msg =
            MessageWriter::<MockTransport>::response(&stream, 599, HttpVersion::HTTP_11, false, None);
        assert_eq!(msg.reason(), Some("599"));
        let msg = MessageWriter::<MockTransport>::response(
            &stream,
            200,
            HttpVersion::HTTP_11,
            false,
            Some("Fine"),
        );
        assert_eq!(msg.reason(), Some("Fine"));
    }

    #[test]
    fn test_hop_headers_are_dropped() {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock);
        let mut msg =
            MessageWriter::<MockTransport>::response(&stream, 200, HttpVersion::HTTP_11, false, None);
        msg.set_hop_headers(&["Proxy-Connection"]);
        msg.add_header("proxy-connection", "keep-alive").unwrap();
        msg.add_header("X-Kept", "yes").unwrap();
        assert!(!msg.headers().contains_key("Proxy-Connection"));
        assert!(msg.headers().contains_key("X-Kept"));
    }

    #[test]
    fn test_invalid_header_names_rejected() {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock);
        let mut msg =
            MessageWriter::<MockTransport>::response(&stream, 200, HttpVersion::HTTP_11, false, None);
        assert!(msg.add_header("", "v").unwrap_err().is_invalid_header());
        assert!(msg.add_header("Bad Name", "v").unwrap_err().is_invalid_header());
        assert!(msg.add_header("Bäd", "v").unwrap_err().is_invalid_header());
        assert!(msg
            .add_header("Content-Length", "not a number")
            .unwrap_err()
            .is_invalid_header());
    }

    #[test]
    #[should_panic(expected = "headers have been sent already")]
    fn test_send_headers_twice_panics() {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock);
        let mut msg =
            MessageWriter::<MockTransport>::response(&stream, 200, HttpVersion::HTTP_11, false, None);
        msg.send_headers();
        msg.send_headers();
    }

    #[test]
    #[should_panic(expected = "headers have been sent already")]
    fn test_add_header_after_send_panics() {
        let mock = MockTransport::new();
        let stream = StreamHandle::new(mock);
        let mut msg =
            MessageWriter::<MockTransport>::response(&stream, 200, HttpVersion::HTTP_11, false, None);
        msg.send_headers();
        let _ = msg.add_header("Late", "no");
    }
}
