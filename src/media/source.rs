//! Frame source over an async byte stream
//!
//! Wraps a reader and a [`MultipartDecoder`] into a lazy, non-restartable
//! sequence of frames. Each call to [`FrameSource::next_frame`] reads until
//! one complete part is buffered, so a frame is either yielded whole or not
//! at all.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::media::Frame;
use crate::protocol::MultipartDecoder;

/// Read buffer growth step
const READ_CHUNK: usize = 64 * 1024;

/// Why a frame sequence ended
#[derive(Debug)]
pub enum SourceEnd {
    /// Producer closed the connection between parts
    Closed,
    /// Closing boundary received
    Terminated,
    /// Framing or I/O failure
    Failed(Error),
}

/// Decodes frames from a producer connection
pub struct FrameSource<R> {
    reader: R,
    decoder: MultipartDecoder,
    buf: BytesMut,
    bytes_read: u64,
    ended: bool,
}

impl<R> FrameSource<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a frame source reading multipart parts from `reader`
    pub fn new(reader: R, decoder: MultipartDecoder) -> Self {
        Self {
            reader,
            decoder,
            buf: BytesMut::with_capacity(READ_CHUNK),
            bytes_read: 0,
            ended: false,
        }
    }

    /// Read the next frame
    ///
    /// `Ok(None)` marks a clean end of the sequence. After the first
    /// `Ok(None)` or error every further call returns `Ok(None)`.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.next().await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Ok(None),
            Err(SourceEnd::Failed(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Read the next frame, reporting the end reason explicitly
    pub async fn next(&mut self) -> std::result::Result<Option<Frame>, SourceEnd> {
        if self.ended {
            return Ok(None);
        }

        let result = self.read_frame().await;
        match result {
            Ok(frame) => Ok(Some(frame)),
            Err(end) => {
                self.ended = true;
                Err(end)
            }
        }
    }

    async fn read_frame(&mut self) -> std::result::Result<Frame, SourceEnd> {
        loop {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) if self.decoder.is_done() => return Err(SourceEnd::Terminated),
                Ok(None) => {}
                Err(e) => return Err(SourceEnd::Failed(e.into())),
            }

            if self.buf.capacity() - self.buf.len() < READ_CHUNK / 4 {
                self.buf.reserve(READ_CHUNK);
            }

            let n = self
                .reader
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| SourceEnd::Failed(e.into()))?;
            self.bytes_read += n as u64;

            if n == 0 {
                return match self.decoder.decode_eof(&mut self.buf) {
                    Ok(Some(frame)) => Ok(frame),
                    Ok(None) if self.decoder.is_done() => Err(SourceEnd::Terminated),
                    Ok(None) => Err(SourceEnd::Closed),
                    Err(e) => Err(SourceEnd::Failed(e.into())),
                };
            }
        }
    }

    /// Total bytes read from the producer
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether the sequence has ended
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    const CAMERA_PARTS: &[u8] = b"\r\n--BND\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nAAA\
\r\n--BND\r\nContent-Type: image/jpeg\r\nContent-Length: 2\r\n\r\nBB";

    #[tokio::test]
    async fn test_frames_across_reads() {
        let reader = tokio_test::io::Builder::new()
            .read(&CAMERA_PARTS[..20])
            .read(&CAMERA_PARTS[20..70])
            .read(&CAMERA_PARTS[70..])
            .build();
        let mut source = FrameSource::new(reader, MultipartDecoder::new("BND"));

        let a = source.next_frame().await.unwrap().unwrap();
        let b = source.next_frame().await.unwrap().unwrap();
        assert_eq!(&a.payload[..], b"AAA");
        assert_eq!(&b.payload[..], b"BB");

        // Peer closes between parts
        assert!(matches!(source.next().await, Err(SourceEnd::Closed)));
        assert!(source.is_ended());
        assert!(source.next_frame().await.unwrap().is_none());
        assert_eq!(source.bytes_read(), CAMERA_PARTS.len() as u64);
    }

    #[tokio::test]
    async fn test_terminator_ends_sequence() {
        let mut data = CAMERA_PARTS.to_vec();
        data.extend_from_slice(b"\r\n--BND--\r\n");
        let mut source = FrameSource::new(&data[..], MultipartDecoder::new("BND"));

        assert!(source.next_frame().await.unwrap().is_some());
        assert!(source.next_frame().await.unwrap().is_some());
        assert!(matches!(source.next().await, Err(SourceEnd::Terminated)));
    }

    #[tokio::test]
    async fn test_truncated_part_is_failure() {
        let data = &CAMERA_PARTS[..CAMERA_PARTS.len() - 1];
        let mut source = FrameSource::new(data, MultipartDecoder::new("BND"));

        assert!(source.next_frame().await.unwrap().is_some());
        let err = source.next_frame().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Truncated)));

        // Non-restartable
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_error_is_failure() {
        let reader = tokio_test::io::Builder::new()
            .read(&CAMERA_PARTS[..40])
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let mut source = FrameSource::new(reader, MultipartDecoder::new("BND"));

        let err = source.next_frame().await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::ConnectionReset));
    }
}
