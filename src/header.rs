//! Streaming HTTP/1.1 header-field scanner and rewriter.
//!
//! This is a permissive scanner tuned for proxying, not an RFC-7230 message
//! parser. It consumes header fields line by line up to and including the
//! terminating empty line, extracts the body-framing and connection hints
//! the session needs, strips single-hop headers, and stages every surviving
//! line verbatim in a [`FixedBuffer`] so the block can be relayed byte for
//! byte.

use crate::buffer::FixedBuffer;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Single header-field lines longer than this are rejected outright.
const MAX_FIELD_LINE: usize = 64 * 1024;

/// Header parsing failures that end the session.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The peer closed before the terminating empty line arrived.
    #[error("unexpected EOF while reading header fields")]
    UnexpectedEof,

    /// The rewritten block exceeded the staging buffer.
    #[error("header block exceeded the staging buffer")]
    ShortBuffer,

    #[error("error when reading header fields: {0}")]
    Io(#[from] io::Error),
}

/// How the message body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No framing header: the message carries no body.
    None,
    /// `Content-Length` bytes follow the header block.
    FixedLength(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// `Transfer-Encoding: identity`: the body runs to EOF.
    Identity,
}

/// Framing and connection hints extracted from one header block.
///
/// `content_length` doubles as the framing code: positive values carry the
/// declared length, `-1` means chunked, `-2` means identity, and `0` means
/// no body.
#[derive(Debug, Default)]
pub struct Header {
    connection_close: bool,
    content_length: i64,
}

const CONNECTION: &[u8] = b"Connection";
const CONTENT_LENGTH: &[u8] = b"Content-Length";
const TRANSFER_ENCODING: &[u8] = b"Transfer-Encoding";

// Single-hop headers a proxy must not relay. Connection is handled (and
// dropped) separately so the close token can be recorded first.
const STRIPPED_HEADERS: [&[u8]; 4] = [
    b"Accept-Encoding",
    b"Proxy-Connection",
    b"Proxy-Authenticate",
    b"Proxy-Authorization",
];

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any `Connection` header carried the `close` token.
    pub fn is_connection_close(&self) -> bool {
        self.connection_close
    }

    pub fn framing(&self) -> BodyFraming {
        match self.content_length {
            -1 => BodyFraming::Chunked,
            -2 => BodyFraming::Identity,
            n if n > 0 => BodyFraming::FixedLength(n as u64),
            _ => BodyFraming::None,
        }
    }

    /// Parse header fields from `reader` up to and including the terminating
    /// empty line, staging the rewritten block in `buffer`.
    ///
    /// Returns the number of bytes consumed from the reader. On failure the
    /// staging buffer is reset and the reader is left wherever the scan
    /// stopped; the session closes the connection either way.
    pub async fn parse_fields<R>(
        &mut self,
        reader: &mut R,
        buffer: &mut FixedBuffer,
    ) -> Result<usize, HeaderError>
    where
        R: AsyncBufRead + Unpin,
    {
        buffer.clear();
        let mut line: Vec<u8> = Vec::with_capacity(256);
        let mut consumed = 0usize;
        let mut first = true;

        loop {
            line.clear();
            let read = match read_line_bounded(reader, &mut line, MAX_FIELD_LINE).await {
                Ok(read) => read,
                // Treat errors on the very first read like a closed peer
                Err(_) if consumed == 0 => return Err(HeaderError::UnexpectedEof),
                Err(e) => {
                    buffer.clear();
                    return Err(HeaderError::Io(e));
                }
            };
            match read {
                LineRead::Line => {}
                LineRead::Eof => {
                    buffer.clear();
                    return Err(HeaderError::UnexpectedEof);
                }
                LineRead::TooLong => {
                    buffer.clear();
                    return Err(HeaderError::ShortBuffer);
                }
            }
            consumed += line.len();

            if is_empty_line(&line) {
                if first {
                    // Empty block: nothing staged, nothing to relay
                    return Ok(consumed);
                }
                // The terminator is relayed so the staged block serializes
                // back byte for byte
                if let Err(e) = self.apply_line(&mut line, buffer) {
                    buffer.clear();
                    return Err(e);
                }
                return Ok(consumed);
            }
            first = false;

            if let Err(e) = self.apply_line(&mut line, buffer) {
                buffer.clear();
                return Err(e);
            }
        }
    }

    fn apply_line(
        &mut self,
        line: &mut Vec<u8>,
        buffer: &mut FixedBuffer,
    ) -> Result<(), HeaderError> {
        // Connection is a single-hop header: record the close token, never
        // relay the line
        if line.starts_with(CONNECTION) {
            line.make_ascii_lowercase();
            if contains(line, b"close") {
                self.connection_close = true;
            }
            return Ok(());
        }

        if line.starts_with(CONTENT_LENGTH) {
            if let Some(colon) = line.iter().position(|&b| b == b':') {
                let value = std::str::from_utf8(&line[colon + 1..])
                    .ok()
                    .map(str::trim)
                    .and_then(|v| v.parse::<i64>().ok());
                // A transfer encoding already in effect wins over any
                // Content-Length (RFC 7230 3.3.3)
                if let Some(length) = value {
                    if length > 0 && self.content_length >= 0 {
                        self.content_length = length;
                    }
                }
            }
        } else if line.starts_with(TRANSFER_ENCODING) {
            if contains(line, b"chunked") {
                self.content_length = -1;
            } else if contains(line, b"identity") {
                self.content_length = -2;
            }
        }

        if STRIPPED_HEADERS.iter().any(|h| line.starts_with(h)) {
            return Ok(());
        }

        buffer
            .write(line)
            .map(|_| ())
            .map_err(|_| HeaderError::ShortBuffer)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn is_empty_line(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

/// Outcome of one bounded line read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineRead {
    /// A full line including its `\n` terminator was appended.
    Line,
    /// The stream ended; any partial tail was appended without a terminator.
    Eof,
    /// The line exceeded `max` bytes; the excess stays unconsumed.
    TooLong,
}

/// Append one `\n`-terminated line from `reader` to `line`, never letting it
/// grow past `max` bytes.
pub(crate) async fn read_line_bounded<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max: usize,
) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let used = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(LineRead::Eof);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    if line.len() + i + 1 > max {
                        return Ok(LineRead::TooLong);
                    }
                    line.extend_from_slice(&available[..=i]);
                    i + 1
                }
                None => {
                    if line.len() + available.len() > max {
                        return Ok(LineRead::TooLong);
                    }
                    line.extend_from_slice(available);
                    available.len()
                }
            }
        };
        reader.consume(used);
        if line.ends_with(b"\n") {
            return Ok(LineRead::Line);
        }
    }
}
