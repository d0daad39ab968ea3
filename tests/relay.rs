//! End-to-end relay tests over loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use mjpeg_relay::client::ProducerClient;
use mjpeg_relay::media::source::SourceEnd;
use mjpeg_relay::protocol::constants::{BOUNDARY, DEFAULT_AUTH_TOKEN, VIEWER_CONTENT_TYPE};
use mjpeg_relay::protocol::MultipartDecoder;
use mjpeg_relay::{FrameSource, RelayConfig, RelayServer, SessionHandle, SessionPhase};

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> RelayConfig {
    RelayConfig::default()
        .bind_producer("127.0.0.1:0".parse().unwrap())
        .bind_viewer("127.0.0.1:0".parse().unwrap())
        .auth_timeout(Duration::from_millis(300))
        .viewer_timeout(None)
        .endpoint_shutdown_grace(Duration::from_secs(1))
}

async fn start(config: RelayConfig) -> Arc<RelayServer> {
    let server = RelayServer::bind(config).await.unwrap();
    let runner = Arc::clone(&server);
    tokio::spawn(async move { runner.run().await });
    server
}

async fn connect_producer(server: &RelayServer) -> ProducerClient {
    ProducerClient::connect(server.producer_addr(), Some(&DEFAULT_AUTH_TOKEN[..]))
        .await
        .unwrap()
}

/// Wait until a session other than `previous` is streaming
async fn wait_streaming(server: &RelayServer, previous: Option<u64>) -> SessionHandle {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(handle) = server.current_session().await {
                if Some(handle.id()) != previous && handle.is_streaming() {
                    return handle;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("producer never started streaming")
}

struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: BufReader<TcpStream>,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn frames(self) -> FrameSource<BufReader<TcpStream>> {
        FrameSource::new(self.body, MultipartDecoder::new(BOUNDARY))
    }

    async fn text(mut self) -> String {
        let mut body = String::new();
        self.body.read_to_string(&mut body).await.unwrap();
        body
    }
}

/// HTTP/1.0 GET, so the streamed body is delimited by connection close
async fn http_get(addr: SocketAddr, path: &str) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {} HTTP/1.0\r\nHost: localhost\r\n\r\n", path).as_bytes())
        .await
        .unwrap();

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    tokio::time::timeout(WAIT, reader.read_line(&mut status_line))
        .await
        .expect("no response")
        .unwrap();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("malformed status line");

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    HttpResponse {
        status,
        headers,
        body: reader,
    }
}

async fn next_payload(frames: &mut FrameSource<BufReader<TcpStream>>) -> Bytes {
    tokio::time::timeout(WAIT, frames.next_frame())
        .await
        .expect("frame not delivered")
        .unwrap()
        .expect("viewer stream ended")
        .payload
}

async fn expect_end(frames: &mut FrameSource<BufReader<TcpStream>>) {
    let end = tokio::time::timeout(WAIT, frames.next())
        .await
        .expect("viewer stream did not end");
    assert!(
        matches!(end, Ok(None) | Err(SourceEnd::Closed)),
        "unexpected viewer end: {:?}",
        end
    );
}

async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("connection left open")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_viewer_wire_format_and_fidelity() {
    let server = start(test_config()).await;
    let mut producer = connect_producer(&server).await;
    wait_streaming(&server, None).await;

    let viewer = http_get(server.viewer_addr(), "/cam").await;
    assert_eq!(viewer.status, 200);
    assert_eq!(viewer.header("content-type"), Some(VIEWER_CONTENT_TYPE));
    assert_eq!(viewer.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(viewer.header("cache-control"), Some("no-cache"));

    let mut frames = viewer.frames();
    for i in 0..20u32 {
        let payload = Bytes::from(format!("jpeg-{:04}-{}", i, "x".repeat(i as usize * 100)));
        producer.send_jpeg(payload.clone()).await.unwrap();
        assert_eq!(next_payload(&mut frames).await, payload);
    }

    producer.finish().await.unwrap();
    expect_end(&mut frames).await;
}

#[tokio::test]
async fn test_two_viewers_late_joiner() {
    let server = start(test_config()).await;
    let mut producer = connect_producer(&server).await;
    wait_streaming(&server, None).await;

    let mut first = http_get(server.viewer_addr(), "/cam").await.frames();

    producer.send_jpeg(Bytes::from_static(b"A")).await.unwrap();
    assert_eq!(&next_payload(&mut first).await[..], b"A");

    let mut second = http_get(server.viewer_addr(), "/cam").await.frames();
    assert_eq!(server.subscriber_count().await, 2);

    producer.send_jpeg(Bytes::from_static(b"B")).await.unwrap();
    assert_eq!(&next_payload(&mut first).await[..], b"B");
    assert_eq!(&next_payload(&mut second).await[..], b"B");

    producer.finish().await.unwrap();
    expect_end(&mut first).await;
    expect_end(&mut second).await;
}

#[tokio::test]
async fn test_replacement_closes_previous_session() {
    let server = start(test_config()).await;

    let mut producer_a = connect_producer(&server).await;
    let session_a = wait_streaming(&server, None).await;

    let mut viewer_a = http_get(server.viewer_addr(), "/cam").await.frames();
    producer_a.send_jpeg(Bytes::from_static(b"from-a")).await.unwrap();
    assert_eq!(&next_payload(&mut viewer_a).await[..], b"from-a");

    let mut producer_b = connect_producer(&server).await;
    let session_b = wait_streaming(&server, Some(session_a.id())).await;

    // A was torn down before B went live
    assert_eq!(session_a.phase(), SessionPhase::Closed);
    assert_eq!(session_b.phase(), SessionPhase::Streaming);
    expect_end(&mut viewer_a).await;

    let mut socket_a = producer_a.into_inner();
    expect_closed(&mut socket_a).await;

    let mut viewer_b = http_get(server.viewer_addr(), "/cam").await.frames();
    producer_b.send_jpeg(Bytes::from_static(b"from-b")).await.unwrap();
    assert_eq!(&next_payload(&mut viewer_b).await[..], b"from-b");
}

#[tokio::test]
async fn test_rapid_reconnects_leave_one_streaming_session() {
    let server = start(test_config()).await;

    let mut producers = Vec::new();
    for _ in 0..5 {
        producers.push(connect_producer(&server).await);
    }

    // Let every connection authenticate and replace its predecessor
    tokio::time::sleep(Duration::from_millis(300)).await;
    wait_streaming(&server, None).await;

    let mut streaming = 0;
    for producer in producers {
        let mut socket = producer.into_inner();
        let mut buf = [0u8; 1];
        match tokio::time::timeout(Duration::from_millis(200), socket.read(&mut buf)).await {
            // Replaced sessions had their connection closed by the relay
            Ok(Ok(0)) | Ok(Err(_)) => {}
            Ok(Ok(_)) => panic!("relay wrote to a producer"),
            Err(_) => streaming += 1,
        }
    }

    assert_eq!(streaming, 1);
    let current = server.current_session().await.unwrap();
    assert!(current.is_streaming());
}

#[tokio::test]
async fn test_bad_token_keeps_current_session() {
    let server = start(test_config()).await;

    let mut producer = connect_producer(&server).await;
    let session = wait_streaming(&server, None).await;
    let mut viewer = http_get(server.viewer_addr(), "/cam").await.frames();

    let mut wrong = DEFAULT_AUTH_TOKEN;
    wrong[31] ^= 0x01;
    let mut intruder = TcpStream::connect(server.producer_addr()).await.unwrap();
    intruder.write_all(&wrong).await.unwrap();
    expect_closed(&mut intruder).await;

    let current = server.current_session().await.unwrap();
    assert_eq!(current.id(), session.id());
    assert!(session.is_streaming());

    producer.send_jpeg(Bytes::from_static(b"still-live")).await.unwrap();
    assert_eq!(&next_payload(&mut viewer).await[..], b"still-live");
}

#[tokio::test]
async fn test_silent_connection_is_closed_after_auth_timeout() {
    let server = start(test_config()).await;

    let started = std::time::Instant::now();
    let mut silent = TcpStream::connect(server.producer_addr()).await.unwrap();
    expect_closed(&mut silent).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(server.current_session().await.is_none());
}

#[tokio::test]
async fn test_viewer_before_producer_is_unavailable() {
    let server = start(test_config()).await;

    let response = http_get(server.viewer_addr(), "/cam").await;
    assert_eq!(response.status, 503);

    let response = http_get(server.viewer_addr(), "/elsewhere").await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_producer_disconnect_ends_viewers() {
    let server = start(test_config()).await;
    let mut producer = connect_producer(&server).await;
    let session = wait_streaming(&server, None).await;

    let mut viewers = Vec::new();
    for _ in 0..3 {
        viewers.push(http_get(server.viewer_addr(), "/cam").await.frames());
    }

    producer.send_jpeg(Bytes::from_static(b"last")).await.unwrap();
    for viewer in viewers.iter_mut() {
        assert_eq!(&next_payload(viewer).await[..], b"last");
    }

    drop(producer);
    tokio::time::timeout(WAIT, session.closed()).await.unwrap();
    for viewer in viewers.iter_mut() {
        expect_end(viewer).await;
    }

    // Stale broadcaster is not served
    let response = http_get(server.viewer_addr(), "/cam").await;
    assert_eq!(response.status, 503);
}

#[tokio::test]
async fn test_idle_viewer_is_evicted() {
    let server = start(test_config().viewer_timeout(Some(Duration::from_millis(200)))).await;
    let _producer = connect_producer(&server).await;
    wait_streaming(&server, None).await;

    let mut viewer = http_get(server.viewer_addr(), "/cam").await.frames();
    assert_eq!(server.subscriber_count().await, 1);

    expect_end(&mut viewer).await;
    assert_eq!(server.subscriber_count().await, 0);
}

#[tokio::test]
async fn test_archive_listing_and_files() {
    let records = tempfile::tempdir().unwrap();
    std::fs::write(records.path().join("2024-05-01_10-00.flv"), b"segment").unwrap();

    let server = start(test_config().archive_dir(records.path())).await;

    let listing = http_get(server.viewer_addr(), "/cam/records/").await;
    assert_eq!(listing.status, 200);
    let html = listing.text().await;
    assert!(html.contains("href=\"/cam/records/2024-05-01_10-00.flv\""));

    let file = http_get(server.viewer_addr(), "/cam/records/2024-05-01_10-00.flv").await;
    assert_eq!(file.status, 200);
    assert_eq!(file.text().await, "segment");

    let missing = http_get(server.viewer_addr(), "/cam/records/nope.flv").await;
    assert_eq!(missing.status, 404);

    std::fs::create_dir(records.path().join("2024-04")).unwrap();
    std::fs::write(records.path().join("2024-04").join("2024-04-30_23-00.flv"), b"older").unwrap();

    let listing = http_get(server.viewer_addr(), "/cam/records/").await;
    assert!(listing.text().await.contains("href=\"/cam/records/2024-04/\""));

    let nested = http_get(server.viewer_addr(), "/cam/records/2024-04/").await;
    assert_eq!(nested.status, 200);
    assert!(nested
        .text()
        .await
        .contains("href=\"/cam/records/2024-04/2024-04-30_23-00.flv\""));

    let file = http_get(server.viewer_addr(), "/cam/records/2024-04/2024-04-30_23-00.flv").await;
    assert_eq!(file.text().await, "older");
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = test_config().bind_producer(taken.local_addr().unwrap());

    match RelayServer::bind(config).await {
        Err(mjpeg_relay::Error::Bind { addr, .. }) => {
            assert_eq!(addr, taken.local_addr().unwrap())
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("bind succeeded on a taken port"),
    }
}

#[tokio::test]
async fn test_shutdown_closes_session() {
    let server = start(test_config()).await;
    let producer = connect_producer(&server).await;
    let session = wait_streaming(&server, None).await;
    let mut viewer = http_get(server.viewer_addr(), "/cam").await.frames();

    server.shutdown().await;

    assert_eq!(session.phase(), SessionPhase::Closed);
    expect_end(&mut viewer).await;
    let mut socket = producer.into_inner();
    expect_closed(&mut socket).await;
}
