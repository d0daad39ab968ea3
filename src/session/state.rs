//! Session state machine
//!
//! Tracks a producer session from accept to close.
//!
//! ```text
//! Authenticating ──(preamble ok)──► Streaming ──(end | replaced)──► Closed
//!        │                                                            ▲
//!        └───────────────(mismatch | timeout | short read)────────────┘
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connection accepted, preamble not yet verified
    Authenticating,
    /// Frames are being decoded and broadcast
    Streaming,
    /// Resources released (terminal)
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection accept time
    pub connected_at: Instant,

    /// Time the session started streaming
    pub streaming_since: Option<Instant>,

    /// Time the session closed
    pub closed_at: Option<Instant>,

    /// Frames decoded from the producer
    pub frames_received: u64,

    /// Payload bytes decoded from the producer
    pub payload_bytes: u64,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Authenticating,
            connected_at: Instant::now(),
            streaming_since: None,
            closed_at: None,
            frames_received: 0,
            payload_bytes: 0,
        }
    }

    /// Enter streaming
    ///
    /// Only valid from `Authenticating`; returns whether the transition
    /// happened.
    pub fn start_streaming(&mut self) -> bool {
        if self.phase != SessionPhase::Authenticating {
            return false;
        }
        self.phase = SessionPhase::Streaming;
        self.streaming_since = Some(Instant::now());
        true
    }

    /// Enter the terminal state
    ///
    /// Returns `false` if the session was already closed, so callers run
    /// their release steps exactly once.
    pub fn close(&mut self) -> bool {
        if self.phase == SessionPhase::Closed {
            return false;
        }
        self.phase = SessionPhase::Closed;
        self.closed_at = Some(Instant::now());
        true
    }

    /// Account one decoded frame
    pub fn record_frame(&mut self, len: usize) {
        self.frames_received += 1;
        self.payload_bytes += len as u64;
    }

    /// Check if the session is streaming
    pub fn is_streaming(&self) -> bool {
        self.phase == SessionPhase::Streaming
    }

    /// Check if the session is closed
    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Time spent streaming so far, or in total once closed
    pub fn streaming_duration(&self) -> Duration {
        match (self.streaming_since, self.closed_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            (None, _) => Duration::ZERO,
        }
    }
}
