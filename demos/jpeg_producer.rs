//! Feed a relay with JPEG files, looping forever
//!
//! Run with: cargo run --example jpeg_producer <DIR> [RELAY_ADDR] [FPS]
//!
//! Examples:
//!   cargo run --example jpeg_producer ./frames                     # to 127.0.0.1:40001 at 15 fps
//!   cargo run --example jpeg_producer ./frames 10.0.0.2:40001 5
//!
//! Then watch http://127.0.0.1:40002/cam in a browser.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use mjpeg_relay::client::ProducerClient;
use mjpeg_relay::protocol::constants::DEFAULT_AUTH_TOKEN;

fn print_usage() {
    eprintln!("Usage: jpeg_producer <DIR> [RELAY_ADDR] [FPS]");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let Some(dir) = args.get(1).map(PathBuf::from) else {
        print_usage();
        std::process::exit(1);
    };
    let addr: SocketAddr = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("127.0.0.1:40001")
        .parse()?;
    let fps: u32 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(15);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_relay=debug".parse()?),
        )
        .init();

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        eprintln!("No .jpg files in {}", dir.display());
        std::process::exit(1);
    }

    let frames: Vec<Bytes> = paths
        .iter()
        .map(|path| std::fs::read(path).map(Bytes::from))
        .collect::<Result<_, _>>()?;

    println!("Sending {} frames to {} at {} fps", frames.len(), addr, fps);

    let mut client = ProducerClient::connect(addr, Some(&DEFAULT_AUTH_TOKEN[..])).await?;
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps.max(1));

    for frame in frames.iter().cycle() {
        ticker.tick().await;
        client.send_jpeg(frame.clone()).await?;

        if client.frames_sent() % (fps.max(1) as u64 * 10) == 0 {
            println!("Sent {} frames", client.frames_sent());
        }
    }

    Ok(())
}
