//! Single-producer MJPEG relay
//!
//! A camera connects over TCP, proves itself with a fixed preamble token and
//! then streams JPEG frames as multipart parts. The relay fans every frame
//! out to HTTP viewers as `multipart/x-mixed-replace`, optionally recording
//! and restreaming the feed through external ffmpeg processes.
//!
//! ```text
//! camera ──TCP──► RelayServer ──► ProducerSession ──► Broadcaster ──► viewers (HTTP)
//!                     │                 │                    └──────► recorder / restreamer
//!                     │                 └─ FrameSource (multipart decode)
//!                     └─ new producer replaces the current session
//! ```
//!
//! Only one producer streams at a time. A newly authenticated producer
//! closes the current session, and every viewer of it sees end-of-stream,
//! before the new session goes live.
//!
//! # Example
//! ```no_run
//! use mjpeg_relay::{RelayConfig, RelayServer};
//!
//! # async fn example() -> mjpeg_relay::error::Result<()> {
//! let server = RelayServer::bind(RelayConfig::default()).await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod client;
pub mod collaborator;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use broadcast::{Broadcaster, Subscriber};
pub use error::{Error, Result};
pub use media::{Frame, FrameSource};
pub use server::{RelayConfig, RelayServer};
pub use session::{ProducerSession, SessionHandle, SessionPhase};
