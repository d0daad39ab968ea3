//! Multipart framing
//!
//! `MultipartDecoder` turns a buffered byte stream into frames, one part at a
//! time. It is a pure decoder: it never performs I/O, it only inspects and
//! consumes a `BytesMut` and reports when it needs more data.
//!
//! Part layout as written by the camera firmware:
//!
//! ```text
//! \r\n--<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 51234\r\n
//! X-Timestamp: 1700000000.123456\r\n
//! \r\n
//! <51234 bytes of JPEG>
//! ```
//!
//! When `Content-Length` is present the frame is complete as soon as its
//! bytes arrive. Without it the body runs until the next `\r\n--<boundary>`,
//! which means the frame is only released once the following part starts.
//! A `--<boundary>--` line terminates the stream.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::media::Frame;
use crate::protocol::constants::{
    DEFAULT_CONTENT_TYPE, DEFAULT_MAX_FRAME_SIZE, MAX_HEADER_SIZE, MAX_PREAMBLE_SKIP,
};

/// Longest boundary line suffix tolerated (transport padding after the token)
const MAX_BOUNDARY_LINE_TAIL: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
enum DecodeState {
    /// Skipping anything before the first boundary line
    Preamble,
    /// Between parts; only a boundary delimiter may follow
    Delimiter,
    /// Reading a part header block
    Headers,
    /// Reading a part body
    Body {
        content_type: String,
        content_length: Option<usize>,
    },
    /// Closing boundary seen
    Done,
}

/// Incremental multipart decoder
#[derive(Debug)]
pub struct MultipartDecoder {
    /// `--<boundary>`
    dash_boundary: Vec<u8>,
    /// `\r\n--<boundary>`
    delimiter: Vec<u8>,
    state: DecodeState,
    max_frame_size: usize,
    /// Offset where the next delimiter scan of an unsized body resumes
    scan_from: usize,
    /// Bytes discarded while looking for the first boundary
    skipped: usize,
    /// Whether the first buffered byte starts a line
    at_line_start: bool,
}

impl MultipartDecoder {
    /// Create a decoder for the given boundary token
    pub fn new(boundary: &str) -> Self {
        Self::with_max_frame_size(boundary, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom part body limit
    pub fn with_max_frame_size(boundary: &str, max_frame_size: usize) -> Self {
        let mut dash_boundary = Vec::with_capacity(boundary.len() + 2);
        dash_boundary.extend_from_slice(b"--");
        dash_boundary.extend_from_slice(boundary.as_bytes());

        let mut delimiter = Vec::with_capacity(dash_boundary.len() + 2);
        delimiter.extend_from_slice(b"\r\n");
        delimiter.extend_from_slice(&dash_boundary);

        Self {
            dash_boundary,
            delimiter,
            state: DecodeState::Preamble,
            max_frame_size,
            scan_from: 0,
            skipped: 0,
            at_line_start: true,
        }
    }

    /// Whether the closing boundary has been seen
    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    /// Whether the decoder sits between parts with nothing half-read
    pub fn is_at_part_boundary(&self) -> bool {
        matches!(self.state, DecodeState::Preamble | DecodeState::Delimiter)
    }

    /// Decode the next frame from `buf`
    ///
    /// Returns `Ok(None)` when more data is needed (or the stream is done,
    /// see [`is_done`](Self::is_done)). Consumed bytes are removed from `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        loop {
            let progressed = match self.state {
                DecodeState::Preamble => self.skip_preamble(buf)?,
                DecodeState::Delimiter => self.read_delimiter(buf)?,
                DecodeState::Headers => self.read_headers(buf)?,
                DecodeState::Body { .. } => match self.read_body(buf)? {
                    Some(frame) => return Ok(Some(frame)),
                    None => false,
                },
                DecodeState::Done => {
                    // Epilogue after the closing boundary is ignored
                    buf.clear();
                    return Ok(None);
                }
            };

            if !progressed {
                return Ok(None);
            }
        }
    }

    /// Decode after the underlying stream reached EOF
    ///
    /// A clean end is only possible between parts. Running out of data
    /// anywhere inside a part is reported as truncation.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        let only_whitespace = buf.iter().all(|b| b.is_ascii_whitespace());
        match self.state {
            DecodeState::Done => Ok(None),
            DecodeState::Preamble if only_whitespace => Ok(None),
            DecodeState::Preamble => Err(ProtocolError::MissingBoundary),
            DecodeState::Delimiter if only_whitespace => Ok(None),
            _ => Err(ProtocolError::Truncated),
        }
    }

    fn skip_preamble(&mut self, buf: &mut BytesMut) -> Result<bool, ProtocolError> {
        let mut from = 0;
        while let Some(pos) = find(&buf[from..], &self.dash_boundary).map(|p| p + from) {
            // The boundary must start a line
            let line_start = if pos == 0 {
                self.at_line_start
            } else {
                buf[pos - 1] == b'\n'
            };
            if line_start {
                self.skipped += pos;
                buf.advance(pos);
                self.state = DecodeState::Delimiter;
                return Ok(true);
            }
            from = pos + 1;
        }

        // Keep a tail that could still be the start of a boundary line
        let keep = self.dash_boundary.len();
        if buf.len() > keep {
            let discard = buf.len() - keep;
            self.at_line_start = buf[discard - 1] == b'\n';
            self.skipped += discard;
            buf.advance(discard);
        }

        if self.skipped > MAX_PREAMBLE_SKIP {
            return Err(ProtocolError::MissingBoundary);
        }
        Ok(false)
    }

    fn read_delimiter(&mut self, buf: &mut BytesMut) -> Result<bool, ProtocolError> {
        let offset = if buf.starts_with(b"\r\n") {
            2
        } else if buf.starts_with(b"\n") {
            1
        } else if buf.as_ref() == b"\r" || buf.is_empty() {
            return Ok(false);
        } else {
            0
        };

        let rest = &buf[offset..];
        if rest.len() < self.dash_boundary.len() {
            if self.dash_boundary.starts_with(rest) {
                return Ok(false);
            }
            return Err(ProtocolError::MalformedBoundary);
        }
        if !rest.starts_with(&self.dash_boundary) {
            return Err(ProtocolError::MalformedBoundary);
        }

        let tail = &rest[self.dash_boundary.len()..];
        if tail.starts_with(b"--") {
            self.state = DecodeState::Done;
            buf.clear();
            return Ok(true);
        }

        let Some(newline) = tail.iter().position(|&b| b == b'\n') else {
            if tail.len() > MAX_BOUNDARY_LINE_TAIL {
                return Err(ProtocolError::MalformedBoundary);
            }
            return Ok(false);
        };

        // Only transport padding may follow the token on its line
        if !tail[..newline]
            .iter()
            .all(|&b| b == b' ' || b == b'\t' || b == b'\r')
        {
            return Err(ProtocolError::MalformedBoundary);
        }

        let consumed = offset + self.dash_boundary.len() + newline + 1;
        buf.advance(consumed);
        self.state = DecodeState::Headers;
        Ok(true)
    }

    fn read_headers(&mut self, buf: &mut BytesMut) -> Result<bool, ProtocolError> {
        let mut content_type = None;
        let mut content_length = None;
        let mut pos = 0;

        loop {
            let Some(newline) = buf[pos..].iter().position(|&b| b == b'\n') else {
                if buf.len() > MAX_HEADER_SIZE {
                    return Err(ProtocolError::HeaderTooLarge(MAX_HEADER_SIZE));
                }
                return Ok(false);
            };

            let line_end = pos + newline;
            let line = trim_cr(&buf[pos..line_end]);
            pos = line_end + 1;

            if pos > MAX_HEADER_SIZE {
                return Err(ProtocolError::HeaderTooLarge(MAX_HEADER_SIZE));
            }

            if line.is_empty() {
                break;
            }

            let text = String::from_utf8_lossy(line);
            let Some((name, value)) = text.split_once(':') else {
                return Err(ProtocolError::MalformedHeader(text.into_owned()));
            };
            let name = name.trim();
            let value = value.trim();

            if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("content-length") {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
                if len > self.max_frame_size {
                    return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
                }
                content_length = Some(len);
            }
        }

        buf.advance(pos);
        self.scan_from = 0;
        self.state = DecodeState::Body {
            content_type: content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            content_length,
        };
        Ok(true)
    }

    fn read_body(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let DecodeState::Body {
            content_type,
            content_length,
        } = &self.state
        else {
            return Ok(None);
        };

        let body_len = match content_length {
            Some(len) => {
                if buf.len() < *len {
                    return Ok(None);
                }
                *len
            }
            None => match find(&buf[self.scan_from..], &self.delimiter) {
                Some(pos) => self.scan_from + pos,
                None => {
                    if buf.len() > self.max_frame_size + self.delimiter.len() {
                        return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
                    }
                    self.scan_from = buf.len().saturating_sub(self.delimiter.len() - 1);
                    return Ok(None);
                }
            },
        };

        if body_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
        }

        let content_type = content_type.clone();
        let payload = buf.split_to(body_len).freeze();
        self.scan_from = 0;
        self.state = DecodeState::Delimiter;

        Ok(Some(Frame::new(content_type, payload)))
    }
}

/// Writes frames as multipart parts
///
/// Viewer streams follow the usual multipart writer layout (no leading CRLF
/// before the first part). Producer streams follow the camera firmware,
/// which prefixes every part with CRLF and stamps it with `X-Timestamp`.
#[derive(Debug, Clone)]
pub struct PartEncoder {
    boundary: String,
    first: bool,
    timestamps: bool,
}

impl PartEncoder {
    /// Encoder for the viewer-facing `multipart/x-mixed-replace` body
    pub fn viewer(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            first: true,
            timestamps: false,
        }
    }

    /// Encoder for the producer wire format
    pub fn producer(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            first: false,
            timestamps: true,
        }
    }

    /// Encode the delimiter and headers of the next part
    ///
    /// The payload itself is not copied; write `frame.payload` right after.
    pub fn encode_header(&mut self, frame: &Frame) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.boundary.len() + 128);

        if !self.first {
            buf.put_slice(b"\r\n");
        }
        self.first = false;

        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"\r\n");

        buf.put_slice(b"Content-Type: ");
        buf.put_slice(frame.content_type().as_bytes());
        buf.put_slice(b"\r\n");

        buf.put_slice(format!("Content-Length: {}\r\n", frame.len()).as_bytes());

        if self.timestamps {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            buf.put_slice(
                format!(
                    "X-Timestamp: {}.{:06}\r\n",
                    now.as_secs(),
                    now.subsec_micros()
                )
                .as_bytes(),
            );
        }

        buf.put_slice(b"\r\n");
        buf.freeze()
    }

    /// Closing boundary line
    pub fn encode_close(&self) -> Bytes {
        Bytes::from(format!("\r\n--{}--\r\n", self.boundary))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
