//! Viewer-side delivery channel

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::broadcaster::Shared;
use crate::media::Frame;

/// Identity of a subscriber within its broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(super) u64);

impl SubscriberId {
    /// Numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of waiting for the next frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A frame arrived
    Frame(Frame),
    /// The broadcaster closed or dropped this subscriber
    Ended,
    /// No frame arrived within the inactivity window
    TimedOut,
}

/// A joined viewer
///
/// Dropping the subscriber removes it from its broadcaster, so a viewer
/// task that disappears for any reason (disconnect, timeout, panic) never
/// leaves a stale slot behind.
pub struct Subscriber {
    id: SubscriberId,
    joined_at: Instant,
    rx: mpsc::Receiver<Frame>,
    broadcaster: Weak<Shared>,
}

impl Subscriber {
    pub(super) fn new(id: SubscriberId, rx: mpsc::Receiver<Frame>, broadcaster: Weak<Shared>) -> Self {
        Self {
            id,
            joined_at: Instant::now(),
            rx,
            broadcaster,
        }
    }

    /// Subscriber identity
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub(super) fn is_joined_to(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.broadcaster.as_ptr(), Arc::as_ptr(shared))
    }

    /// When the subscriber joined
    pub fn joined_at(&self) -> Instant {
        self.joined_at
    }

    /// Wait for the next frame, `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Wait for the next frame with an optional inactivity limit
    pub async fn recv_timeout(&mut self, idle: Option<Duration>) -> Delivery {
        let Some(idle) = idle else {
            return match self.rx.recv().await {
                Some(frame) => Delivery::Frame(frame),
                None => Delivery::Ended,
            };
        };

        match tokio::time::timeout(idle, self.rx.recv()).await {
            Ok(Some(frame)) => Delivery::Frame(frame),
            Ok(None) => Delivery::Ended,
            Err(_) => Delivery::TimedOut,
        }
    }

    /// Take the pending frame without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("joined_at", &self.joined_at)
            .finish()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(shared) = self.broadcaster.upgrade() {
            shared.remove(self.id);
        }
    }
}
