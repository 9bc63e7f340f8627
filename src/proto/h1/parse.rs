//! Parsing of request and response heads from pre-split header lines.
//!
//! The input contract is the line-splitter's output: element 0 is the
//! request or status line, the following elements are header lines, all
//! with their CRLFs already stripped, and the block ends with an empty
//! line sentinel. Continuation lines (RFC 5322 folding) are joined back
//! onto the preceding header with a `\r\n` separator.

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};
use crate::headers::{trim_ascii_ws, HeaderMap, RawHeaders};
use crate::proto::{ContentCoding, MessageHead, RawStatus, RequestHead, RequestLine, ResponseHead};
use crate::version::HttpVersion;

/// Size limits applied while parsing a message head.
///
/// `max_line_size` bounds a single line and is enforced by the line
/// splitter feeding this parser; the other two are enforced here.
#[derive(Clone, Copy, Debug)]
pub struct ParseConfig {
    /// Longest single header line the line splitter may hand over.
    pub max_line_size: usize,
    /// Most headers allowed in one message head.
    pub max_headers: usize,
    /// Longest accumulated size of one header field, continuations included.
    pub max_field_size: usize,
}

impl Default for ParseConfig {
    fn default() -> ParseConfig {
        ParseConfig {
            max_line_size: 8190,
            max_headers: 32768,
            max_field_size: 8190,
        }
    }
}

/// Parses request heads from pre-split lines.
#[derive(Clone, Debug, Default)]
pub struct RequestParser {
    config: ParseConfig,
}

/// Parses response heads from pre-split lines.
#[derive(Clone, Debug, Default)]
pub struct ResponseParser {
    config: ParseConfig,
}

impl RequestParser {
    /// Creates a parser with default limits.
    pub fn new() -> RequestParser {
        RequestParser::default()
    }

    /// Creates a parser with the given limits.
    pub fn with_config(config: ParseConfig) -> RequestParser {
        RequestParser { config }
    }

    /// Parses one request head out of `lines`.
    ///
    /// Returns `BadStatusLine` for a malformed request line and the header
    /// errors of [`ResponseParser::parse_message`] for the header block.
    /// An undetermined `Connection` header defaults to closing for
    /// HTTP/1.0 and earlier and keep-alive for HTTP/1.1 and later.
    pub fn parse_message(&self, lines: &[&[u8]]) -> Result<RequestHead> {
        let line = *lines.first().ok_or_else(Error::new_status_line)?;
        trace!("parse request line ({} bytes)", line.len());

        let (method, rest) = split_field(line);
        let (path, version) = split_field(rest);
        let version = trim_ascii_ws(version);
        if method.is_empty() || path.is_empty() || version.is_empty() {
            return Err(Error::new_status_line().with(lossy(line)));
        }

        let method = parse_method(method).ok_or_else(|| Error::new_status_line().with(lossy(line)))?;
        let version = parse_version(version).ok_or_else(|| Error::new_status_line().with(lossy(line)))?;

        let block = parse_header_block(&self.config, lines)?;
        // HTTP/1.0 must ask to keep the connection open, 1.1 must ask to close.
        let should_close = block
            .close
            .unwrap_or(version <= HttpVersion::HTTP_10);

        Ok(MessageHead {
            version,
            subject: RequestLine {
                method,
                path: String::from_utf8_lossy(path).into_owned(),
            },
            headers: block.headers,
            raw_headers: block.raw_headers,
            should_close,
            compression: block.compression,
            upgrade: block.upgrade,
            chunked: block.chunked,
        })
    }
}

impl ResponseParser {
    /// Creates a parser with default limits.
    pub fn new() -> ResponseParser {
        ResponseParser::default()
    }

    /// Creates a parser with the given limits.
    pub fn with_config(config: ParseConfig) -> ResponseParser {
        ResponseParser { config }
    }

    /// Parses one response head out of `lines`.
    ///
    /// The status code must be a decimal integer in `100..=999`; a missing
    /// reason phrase becomes the empty string.
    pub fn parse_message(&self, lines: &[&[u8]]) -> Result<ResponseHead> {
        let line = *lines.first().ok_or_else(Error::new_status_line)?;
        trace!("parse status line ({} bytes)", line.len());

        let (version, rest) = split_field(line);
        let (status, reason) = split_field(rest);
        if version.is_empty() || status.is_empty() {
            return Err(Error::new_status_line().with(lossy(line)));
        }

        let version = parse_version(version).ok_or_else(|| Error::new_status_line().with(lossy(line)))?;
        let code = parse_status(status).ok_or_else(|| Error::new_status_line().with(lossy(line)))?;
        let reason = String::from_utf8_lossy(trim_ascii_ws(reason)).into_owned();

        let block = parse_header_block(&self.config, lines)?;
        let should_close = block
            .close
            .unwrap_or(version <= HttpVersion::HTTP_10);

        Ok(MessageHead {
            version,
            subject: RawStatus { code, reason },
            headers: block.headers,
            raw_headers: block.raw_headers,
            should_close,
            compression: block.compression,
            upgrade: block.upgrade,
            chunked: block.chunked,
        })
    }
}

struct HeaderBlock {
    headers: HeaderMap,
    raw_headers: RawHeaders,
    close: Option<bool>,
    compression: Option<ContentCoding>,
    upgrade: bool,
    chunked: bool,
}

/// Parses the header lines after the first into a multimap plus the
/// connection flags derived from `Connection`, `Content-Encoding`, and
/// `Transfer-Encoding`.
fn parse_header_block(config: &ParseConfig, lines: &[&[u8]]) -> Result<HeaderBlock> {
    let mut headers = HeaderMap::new();
    let mut raw_headers = RawHeaders::new();

    let mut idx = 1;
    while let Some(&line) = lines.get(idx) {
        if line.is_empty() {
            break;
        }
        let mut header_length = line.len();

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| Error::new_header().with(lossy(line)))?;
        let name = trim_name(&line[..colon]);
        if name.is_empty() || name.iter().any(|&b| is_forbidden_name_byte(b)) {
            return Err(Error::new_header().with(lossy(line)));
        }
        let name = name.to_ascii_uppercase();
        let mut value = line[colon + 1..].to_vec();

        // Consume continuation lines, joined with a CRLF separator.
        idx += 1;
        while let Some(&next) = lines.get(idx) {
            if !next.first().map_or(false, |&b| b == b' ' || b == b'\t') {
                break;
            }
            header_length += next.len();
            if header_length > config.max_field_size {
                return Err(Error::new_too_large().with(format!(
                    "header field {} over {} bytes",
                    String::from_utf8_lossy(&name),
                    config.max_field_size
                )));
            }
            value.extend_from_slice(b"\r\n");
            value.extend_from_slice(next);
            idx += 1;
        }
        if header_length > config.max_field_size {
            return Err(Error::new_too_large().with(format!(
                "header field {} over {} bytes",
                String::from_utf8_lossy(&name),
                config.max_field_size
            )));
        }
        if headers.len() >= config.max_headers {
            return Err(Error::new_too_large()
                .with(format!("more than {} headers", config.max_headers)));
        }

        let value = Bytes::copy_from_slice(trim_ascii_ws(&value));
        let name = Bytes::from(name);
        headers.append(name.clone(), value.clone());
        raw_headers.push((name, value));
    }

    let mut close = None;
    let mut upgrade = false;

    if let Some(conn) = headers.get("CONNECTION") {
        let conn = conn.to_ascii_lowercase();
        if conn == b"close" {
            close = Some(true);
        } else if conn == b"keep-alive" {
            close = Some(false);
        } else if conn == b"upgrade" {
            upgrade = true;
        }
    }

    let compression = headers
        .get("CONTENT-ENCODING")
        .and_then(|enc| ContentCoding::from_value(enc));

    let chunked = headers
        .get("TRANSFER-ENCODING")
        .map_or(false, |te| crate::headers::value_contains_ignore_case(te, "chunked"));

    Ok(HeaderBlock {
        headers,
        raw_headers,
        close,
        compression,
        upgrade,
        chunked,
    })
}

/// Splits off the first whitespace-delimited field, returning it and the
/// remainder with its leading whitespace stripped.
fn split_field(line: &[u8]) -> (&[u8], &[u8]) {
    let mut start = 0;
    while start < line.len() && crate::headers::is_ascii_ws(line[start]) {
        start += 1;
    }
    let mut end = start;
    while end < line.len() && !crate::headers::is_ascii_ws(line[end]) {
        end += 1;
    }
    let mut rest = end;
    while rest < line.len() && crate::headers::is_ascii_ws(line[rest]) {
        rest += 1;
    }
    (&line[start..end], &line[rest..])
}

/// Upper-cases and validates a request method.
///
/// The accepted alphabet is the byte range `0x24..=0x5F`, which covers
/// upper-case letters, digits, and the token punctuation real methods use.
fn parse_method(field: &[u8]) -> Option<String> {
    let upper = field.to_ascii_uppercase();
    if upper.iter().all(|&b| (0x24..=0x5f).contains(&b)) {
        String::from_utf8(upper).ok()
    } else {
        None
    }
}

/// Parses `HTTP/<major>.<minor>`, requiring single-digit-valued parts.
fn parse_version(field: &[u8]) -> Option<HttpVersion> {
    let rest = field.strip_prefix(b"HTTP/")?;
    let dot = rest.iter().position(|&b| b == b'.')?;
    let major = parse_decimal(&rest[..dot])?;
    let minor = parse_decimal(&rest[dot + 1..])?;
    if major < 10 && minor < 10 {
        Some(HttpVersion::new(major, minor))
    } else {
        None
    }
}

fn parse_status(field: &[u8]) -> Option<u16> {
    let code = parse_decimal(field)?;
    if (100..=999).contains(&code) {
        Some(code)
    } else {
        None
    }
}

fn parse_decimal(field: &[u8]) -> Option<u16> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn trim_name(mut name: &[u8]) -> &[u8] {
    while let Some((&b, rest)) = name.split_first() {
        if b == b' ' || b == b'\t' {
            name = rest;
        } else {
            break;
        }
    }
    while let Some((&b, rest)) = name.split_last() {
        if b == b' ' || b == b'\t' {
            name = rest;
        } else {
            break;
        }
    }
    name
}

/// RFC 7230 separators and controls, forbidden inside a header name.
fn is_forbidden_name_byte(b: u8) -> bool {
    match b {
        0x00..=0x1f | 0x7f => true,
        b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' => true,
        b'[' | b']' | b'=' | b'{' | b'}' | b' ' | b'\t' | b'\\' | b'"' => true,
        _ => false,
    }
}

fn lossy(line: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(line))
}
