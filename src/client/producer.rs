//! Producer client
//!
//! Speaks the camera side of the producer protocol: the preamble token,
//! then one multipart part per frame.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::media::Frame;
use crate::protocol::constants::{BOUNDARY, DEFAULT_CONTENT_TYPE};
use crate::protocol::PartEncoder;

/// Pushes frames to a relay
///
/// # Example
/// ```no_run
/// use bytes::Bytes;
/// use mjpeg_relay::client::ProducerClient;
/// use mjpeg_relay::protocol::constants::DEFAULT_AUTH_TOKEN;
///
/// # async fn example() -> mjpeg_relay::error::Result<()> {
/// let addr = "127.0.0.1:40001".parse().unwrap();
/// let mut client = ProducerClient::connect(addr, Some(&DEFAULT_AUTH_TOKEN[..])).await?;
///
/// let jpeg = Bytes::from(std::fs::read("frame.jpg")?);
/// client.send_jpeg(jpeg).await?;
/// client.finish().await?;
/// # Ok(())
/// # }
/// ```
pub struct ProducerClient<S = TcpStream> {
    stream: S,
    encoder: PartEncoder,
    frames_sent: u64,
}

impl ProducerClient<TcpStream> {
    /// Connect to `addr` and send the preamble, if any
    pub async fn connect(addr: SocketAddr, token: Option<&[u8]>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, token).await
    }
}

impl<S> ProducerClient<S>
where
    S: AsyncWrite + Unpin,
{
    /// Send the preamble over an already open stream
    pub async fn handshake(mut stream: S, token: Option<&[u8]>) -> Result<Self> {
        if let Some(token) = token {
            stream.write_all(token).await?;
        }

        Ok(Self {
            stream,
            encoder: PartEncoder::producer(BOUNDARY),
            frames_sent: 0,
        })
    }

    /// Send one frame as a multipart part
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let header = self.encoder.encode_header(frame);
        self.stream.write_all(&header).await?;
        self.stream.write_all(&frame.payload).await?;
        self.stream.flush().await?;

        self.frames_sent += 1;
        Ok(())
    }

    /// Send a JPEG image
    pub async fn send_jpeg(&mut self, jpeg: Bytes) -> Result<()> {
        self.send_frame(&Frame::new(DEFAULT_CONTENT_TYPE, jpeg)).await
    }

    /// Send the closing boundary and shut the connection down
    pub async fn finish(mut self) -> Result<()> {
        let close = self.encoder.encode_close();
        self.stream.write_all(&close).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Frames sent so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::protocol::constants::DEFAULT_AUTH_TOKEN;
    use crate::protocol::{Authenticator, MultipartDecoder};

    #[tokio::test]
    async fn test_wire_format_roundtrip() {
        let (client_side, mut relay_side) = tokio::io::duplex(64 * 1024);

        let mut client = ProducerClient::handshake(client_side, Some(&DEFAULT_AUTH_TOKEN[..]))
            .await
            .unwrap();
        client
            .send_jpeg(Bytes::from_static(b"\xff\xd8jpeg\xff\xd9"))
            .await
            .unwrap();
        client
            .send_frame(&Frame::new("image/png", Bytes::from_static(b"png")))
            .await
            .unwrap();
        assert_eq!(client.frames_sent(), 2);
        client.finish().await.unwrap();

        let auth = Authenticator::new(DEFAULT_AUTH_TOKEN.to_vec(), Duration::from_secs(1));
        auth.authenticate(&mut relay_side).await.unwrap();

        let mut raw = Vec::new();
        relay_side.read_to_end(&mut raw).await.unwrap();
        let mut buf = BytesMut::from(&raw[..]);

        // Camera framing: every part starts with CRLF and carries a timestamp
        assert!(buf.starts_with(format!("\r\n--{}\r\n", BOUNDARY).as_bytes()));
        assert!(String::from_utf8_lossy(&buf).contains("X-Timestamp: "));

        let mut decoder = MultipartDecoder::new(BOUNDARY);
        let jpeg = decoder.decode(&mut buf).unwrap().unwrap();
        let png = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(jpeg.content_type(), "image/jpeg");
        assert_eq!(&jpeg.payload[..], b"\xff\xd8jpeg\xff\xd9");
        assert_eq!(png.content_type(), "image/png");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(decoder.is_done());
    }

    #[tokio::test]
    async fn test_no_token() {
        let (client_side, relay_side) = tokio::io::duplex(1024);
        let client = ProducerClient::handshake(client_side, None).await.unwrap();
        drop(client);

        let mut reader = relay_side;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
