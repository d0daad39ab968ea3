//! Counters reported when a producer session closes

use std::time::Duration;

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Frames decoded from the producer
    pub frames_received: u64,
    /// Raw bytes read from the producer connection
    pub bytes_received: u64,
    /// JPEG payload bytes, part headers and boundaries excluded
    pub payload_bytes: u64,
    /// Time spent streaming
    pub duration: Duration,
    /// Fan-out counters of the session's broadcaster
    pub broadcast: BroadcastStats,
}

impl SessionStats {
    /// Create a new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Average inbound bitrate (bits/sec)
    pub fn bitrate(&self) -> u64 {
        let millis = self.duration.as_millis() as u64;
        if millis > 0 {
            self.bytes_received * 8 * 1000 / millis
        } else {
            0
        }
    }

    /// Average payload size per frame
    pub fn average_frame_size(&self) -> u64 {
        if self.frames_received > 0 {
            self.payload_bytes / self.frames_received
        } else {
            0
        }
    }

    /// Average inbound frame rate
    pub fn frame_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_received as f64 / secs
        } else {
            0.0
        }
    }
}

/// Broadcaster fan-out counters
///
/// `delivered + dropped` counts per-subscriber hand-off attempts, so one
/// published frame with three viewers contributes three attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Frames passed to `publish`
    pub published: u64,
    /// Frames handed to a subscriber slot
    pub delivered: u64,
    /// Frames skipped because a subscriber slot was still full
    pub dropped: u64,
    /// Subscribers currently joined
    pub subscribers: usize,
}

impl BroadcastStats {
    /// Fraction of hand-off attempts that were dropped
    pub fn drop_ratio(&self) -> f64 {
        let attempts = self.delivered + self.dropped;
        if attempts > 0 {
            self.dropped as f64 / attempts as f64
        } else {
            0.0
        }
    }
}
