//! Header scanner invariants exercised over whole blocks.

use std::io::Cursor;
use tokio::io::BufReader;
use wiretap::{BodyFraming, FixedBuffer, Header, HeaderError};

async fn scan(block: &[u8], capacity: usize) -> (Header, FixedBuffer, Result<usize, HeaderError>) {
    let mut header = Header::new();
    let mut buffer = FixedBuffer::with_capacity(capacity);
    let mut reader = BufReader::new(Cursor::new(block.to_vec()));
    let result = header.parse_fields(&mut reader, &mut buffer).await;
    (header, buffer, result)
}

// ============================================================================
// Stripping invariants
// ============================================================================

#[tokio::test]
async fn test_no_single_hop_header_survives() {
    let block = b"Host: example.test\r\n\
        Connection: keep-alive\r\n\
        Accept-Encoding: gzip, br\r\n\
        Proxy-Connection: keep-alive\r\n\
        Proxy-Authenticate: Basic\r\n\
        Proxy-Authorization: Basic dXNlcjpwYXNz\r\n\
        X-Custom: kept\r\n\r\n";
    let (_, buffer, result) = scan(block, 4096).await;
    result.unwrap();

    let emitted = String::from_utf8(buffer.as_slice().to_vec()).unwrap();
    for banned in [
        "Connection",
        "Accept-Encoding",
        "Proxy-Connection",
        "Proxy-Authenticate",
        "Proxy-Authorization",
    ] {
        assert!(
            !emitted.contains(banned),
            "{banned} leaked into the rewritten block: {emitted}"
        );
    }
    assert!(emitted.contains("Host: example.test"));
    assert!(emitted.contains("X-Custom: kept"));
}

#[tokio::test]
async fn test_consumes_through_terminator_exactly() {
    let block = b"Host: a\r\n\r\ntrailing body bytes";
    let (_, _, result) = scan(block, 4096).await;
    assert_eq!(result.unwrap(), "Host: a\r\n\r\n".len());
}

// ============================================================================
// Framing invariants
// ============================================================================

#[tokio::test]
async fn test_positive_content_length_recorded() {
    let (header, _, result) = scan(b"Content-Length: 12345\r\n\r\n", 4096).await;
    result.unwrap();
    assert_eq!(header.framing(), BodyFraming::FixedLength(12345));
}

#[tokio::test]
async fn test_chunked_wins_regardless_of_content_length() {
    let (header, _, result) = scan(
        b"Content-Length: 999\r\nTransfer-Encoding: chunked\r\n\r\n",
        4096,
    )
    .await;
    result.unwrap();
    assert_eq!(header.framing(), BodyFraming::Chunked);

    let (header, _, result) = scan(
        b"Transfer-Encoding: chunked\r\nContent-Length: 999\r\n\r\n",
        4096,
    )
    .await;
    result.unwrap();
    assert_eq!(header.framing(), BodyFraming::Chunked);
}

#[tokio::test]
async fn test_connection_close_case_insensitive_token() {
    for value in ["close", "Close", "CLOSE", "keep-alive, CLOSE"] {
        let block = format!("Connection: {value}\r\n\r\n");
        let (header, _, result) = scan(block.as_bytes(), 4096).await;
        result.unwrap();
        assert!(
            header.is_connection_close(),
            "close token not detected in {value:?}"
        );
    }
}

// ============================================================================
// Failure invariants
// ============================================================================

#[tokio::test]
async fn test_short_buffer_with_tiny_capacity() {
    // A five byte buffer cannot stage even the first field line
    let (_, buffer, result) = scan(b"X: y\r\n\r\n", 5).await;
    assert!(matches!(result, Err(HeaderError::ShortBuffer)));
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn test_unexpected_eof_on_truncated_block() {
    let (_, _, result) = scan(b"Host: example.test\r\nX-Half", 4096).await;
    assert!(matches!(result, Err(HeaderError::UnexpectedEof)));
}

#[tokio::test]
async fn test_unexpected_eof_on_empty_stream() {
    let (_, _, result) = scan(b"", 4096).await;
    assert!(matches!(result, Err(HeaderError::UnexpectedEof)));
}

// ============================================================================
// Round-trip
// ============================================================================

#[tokio::test]
async fn test_round_trip_without_single_hop_headers() {
    let blocks: [&[u8]; 4] = [
        b"Host: example.test\r\nUser-Agent: t\r\nAccept: */*\r\n\r\n",
        b"Host: a.example\r\nContent-Length: 3\r\n\r\n",
        b"Host: b.example\r\nX-A: 1\r\nX-B: 2\r\nX-C: 3\r\n\r\n",
        b"Host: lf.example\nX-Bare: lf\n\n",
    ];
    for block in blocks {
        let (_, buffer, result) = scan(block, 4096).await;
        result.unwrap();
        assert_eq!(
            buffer.as_slice(),
            block,
            "block not byte-equal after rewrite: {:?}",
            String::from_utf8_lossy(block)
        );
    }
}
