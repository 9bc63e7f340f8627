//! End-to-end codec tests: emit with the writers, re-parse with the parsers.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use h1_wire::{
    BodyConfig, BodyDecoder, ContentCoding, HttpVersion, MessageWriter, PayloadBuffer,
    RequestParser, ResponseParser, StreamHandle, Transport,
};

/// Transport double that records everything written.
#[derive(Clone, Default)]
struct VecTransport {
    written: Arc<Mutex<Vec<u8>>>,
}

impl VecTransport {
    fn new() -> VecTransport {
        VecTransport::default()
    }

    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

impl Transport for VecTransport {
    fn write(&mut self, data: &[u8]) {
        self.written.lock().unwrap().extend_from_slice(data);
    }
}

/// Splits an emitted message into line-splitter output plus the body bytes.
fn split_message(bytes: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
    let end = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("message head terminator");
    let mut lines: Vec<Vec<u8>> = bytes[..end]
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .collect();
    lines.push(Vec::new());
    (lines, bytes[end + 4..].to_vec())
}

fn as_slices(lines: &[Vec<u8>]) -> Vec<&[u8]> {
    lines.iter().map(|l| l.as_slice()).collect()
}

#[test]
fn parse_get_keep_alive() {
    let head = RequestParser::new()
        .parse_message(&[b"GET /foo HTTP/1.1", b"Host: x", b""])
        .unwrap();
    assert_eq!(head.subject.method, "GET");
    assert_eq!(head.subject.path, "/foo");
    assert_eq!(head.version, HttpVersion::new(1, 1));
    assert!(!head.should_close);
    assert!(!head.chunked);
    assert!(head.compression.is_none());
    assert!(!head.upgrade);
}

#[test]
fn parse_response_chunked_gzip() {
    let head = ResponseParser::new()
        .parse_message(&[
            b"HTTP/1.1 200 OK",
            b"Transfer-Encoding: chunked",
            b"Content-Encoding: gzip",
            b"",
        ])
        .unwrap();
    assert_eq!(head.subject.code, 200);
    assert_eq!(head.subject.reason, "OK");
    assert!(head.chunked);
    assert_eq!(head.compression, Some(ContentCoding::Gzip));
    assert!(!head.should_close);
}

#[tokio::test]
async fn request_round_trip() {
    let _ = pretty_env_logger::try_init();
    let transport = VecTransport::new();
    let stream = StreamHandle::new(transport.clone());

    let mut msg = MessageWriter::request(&stream, "POST", "/upload", HttpVersion::new(1, 1), false);
    msg.add_header("Host", "example.com").unwrap();
    msg.add_header("X-Token", "abc123").unwrap();
    msg.send_headers();
    msg.write(b"hello ", true).await.unwrap();
    msg.write_eof(b"world").await.unwrap();

    let (lines, body_bytes) = split_message(&transport.written());
    let head = RequestParser::new()
        .parse_message(&as_slices(&lines))
        .unwrap();
    assert_eq!(head.subject.method, "POST");
    assert_eq!(head.subject.path, "/upload");
    assert_eq!(head.version, HttpVersion::new(1, 1));
    assert!(head.chunked, "v1.1 request without length autochunks");
    assert_eq!(head.headers.get("host").unwrap().as_ref(), b"example.com");
    assert_eq!(head.headers.get("x-token").unwrap().as_ref(), b"abc123");

    let sink = PayloadBuffer::new();
    let mut body = BodyDecoder::new(
        Box::new(sink.clone()),
        BodyConfig {
            chunked: head.chunked,
            ..BodyConfig::new()
        },
    )
    .unwrap();
    let (done, leftover) = body.feed_data(Bytes::from(body_bytes)).unwrap();
    assert!(done);
    assert!(leftover.is_empty());
    assert_eq!(sink.data().as_ref(), b"hello world");
}

#[tokio::test]
async fn response_round_trip_gzip() {
    let transport = VecTransport::new();
    let stream = StreamHandle::new(transport.clone());

    let mut msg = MessageWriter::response(&stream, 200, HttpVersion::new(1, 1), false, None);
    msg.add_header("Content-Encoding", "gzip").unwrap();
    msg.enable_compression(ContentCoding::Gzip);
    msg.send_headers();
    msg.write(b"a body worth compressing, a body worth compressing", true)
        .await
        .unwrap();
    msg.write_eof(b"").await.unwrap();

    let (lines, body_bytes) = split_message(&transport.written());
    let head = ResponseParser::new()
        .parse_message(&as_slices(&lines))
        .unwrap();
    assert_eq!(head.subject.code, 200);
    assert!(head.chunked);
    assert_eq!(head.compression, Some(ContentCoding::Gzip));

    // Decode in deliberately awkward slices: framing and inflate state must
    // both survive arbitrary splits.
    for step in [1usize, 3, 7, body_bytes.len()] {
        let sink = PayloadBuffer::new();
        let mut body = BodyDecoder::new(
            Box::new(sink.clone()),
            BodyConfig {
                chunked: head.chunked,
                compression: head.compression,
                ..BodyConfig::new()
            },
        )
        .unwrap();
        let mut finished = false;
        for piece in body_bytes.chunks(step) {
            let (done, _) = body.feed_data(Bytes::copy_from_slice(piece)).unwrap();
            finished = done;
        }
        assert!(finished, "step {}", step);
        assert_eq!(
            sink.data().as_ref(),
            b"a body worth compressing, a body worth compressing" as &[u8],
            "step {}",
            step
        );
    }
}

#[tokio::test]
async fn response_with_content_length_round_trip() {
    let transport = VecTransport::new();
    let stream = StreamHandle::new(transport.clone());

    let mut msg = MessageWriter::response(&stream, 200, HttpVersion::new(1, 1), false, None);
    msg.add_header("Content-Length", "5").unwrap();
    msg.send_headers();
    // Only the first five bytes may reach the wire.
    msg.write(b"hello, but too long", true).await.unwrap();
    msg.write_eof(b"").await.unwrap();

    let (lines, body_bytes) = split_message(&transport.written());
    let head = ResponseParser::new()
        .parse_message(&as_slices(&lines))
        .unwrap();
    assert!(!head.chunked);
    assert_eq!(head.headers.get("content-length").unwrap().as_ref(), b"5");
    assert_eq!(body_bytes, b"hello");

    let sink = PayloadBuffer::new();
    let mut body = BodyDecoder::new(
        Box::new(sink.clone()),
        BodyConfig {
            length: Some(5),
            ..BodyConfig::new()
        },
    )
    .unwrap();
    let (done, leftover) = body.feed_data(Bytes::from(body_bytes)).unwrap();
    assert!(done);
    assert!(leftover.is_empty());
    assert_eq!(sink.data().as_ref(), b"hello");
}

#[tokio::test]
async fn pipelined_messages_stay_ordered() {
    let transport = VecTransport::new();
    let stream = StreamHandle::new(transport.clone());

    let mut first = MessageWriter::response(&stream, 200, HttpVersion::new(1, 1), false, None);
    let mut second = MessageWriter::response(&stream, 404, HttpVersion::new(1, 1), false, None);

    // The second response is fully produced before the first finishes; its
    // bytes must still come out after the first's.
    second.add_header("Content-Length", "0").unwrap();
    second.send_headers();

    first.add_header("Content-Length", "2").unwrap();
    first.send_headers();
    first.write(b"ok", true).await.unwrap();
    first.write_eof(b"").await.unwrap();
    second.write_eof(b"").await.unwrap();

    let written = transport.written();
    let text = String::from_utf8_lossy(&written);
    let first_at = text.find("HTTP/1.1 200").expect("first response");
    let second_at = text.find("HTTP/1.1 404").expect("second response");
    assert!(first_at < second_at);
    assert!(stream.is_available());
}

#[test]
fn chunked_decode_is_slicing_invariant() {
    let wire = b"6\r\nSlices\r\n9;ext=here\r\n of bytes\r\n0\r\n\r\n";
    let mut reference: Option<Bytes> = None;
    for step in 1..=wire.len() {
        let sink = PayloadBuffer::new();
        let mut body = BodyDecoder::new(
            Box::new(sink.clone()),
            BodyConfig {
                chunked: true,
                ..BodyConfig::new()
            },
        )
        .unwrap();
        let mut finished = false;
        for piece in wire.chunks(step) {
            let (done, _) = body.feed_data(Bytes::copy_from_slice(piece)).unwrap();
            finished = done;
        }
        assert!(finished, "step {}", step);
        let decoded = sink.data();
        if let Some(ref reference) = reference {
            assert_eq!(&decoded, reference, "step {}", step);
        } else {
            assert_eq!(decoded.as_ref(), b"Slices of bytes");
            reference = Some(decoded);
        }
    }
}
