//! Broadcaster implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::subscriber::{Subscriber, SubscriberId};
use crate::media::Frame;
use crate::stats::BroadcastStats;

/// Capacity of each subscriber's delivery slot
const SLOT_CAPACITY: usize = 1;

/// State shared between a broadcaster and its subscribers
pub(super) struct Shared {
    session_id: u64,
    slots: Mutex<Slots>,
    next_subscriber_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

struct Slots {
    closed: bool,
    senders: HashMap<SubscriberId, mpsc::Sender<Frame>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn remove(&self, id: SubscriberId) -> bool {
        let mut slots = self.lock();
        let removed = slots.senders.remove(&id).is_some();
        let remaining = slots.senders.len();
        drop(slots);

        if removed {
            tracing::debug!(
                session_id = self.session_id,
                subscriber_id = %id,
                subscribers = remaining,
                "Subscriber left"
            );
        }
        removed
    }
}

/// Result of one `publish` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Subscribers whose slot accepted the frame
    pub delivered: usize,
    /// Subscribers whose slot was still full
    pub dropped: usize,
}

/// Fans frames out to the live subscribers of one producer session
///
/// Cloning yields another handle to the same subscriber set.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Broadcaster {
    /// Create an empty broadcaster for a session
    pub fn new(session_id: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                session_id,
                slots: Mutex::new(Slots {
                    closed: false,
                    senders: HashMap::new(),
                }),
                next_subscriber_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Session this broadcaster belongs to
    pub fn session_id(&self) -> u64 {
        self.shared.session_id
    }

    /// Add a new subscriber
    ///
    /// Joining a closed broadcaster yields a subscriber whose stream has
    /// already ended.
    pub fn join(&self) -> Subscriber {
        let id = SubscriberId(self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SLOT_CAPACITY);

        let mut slots = self.shared.lock();
        if slots.closed {
            drop(slots);
            drop(tx);
            tracing::debug!(
                session_id = self.shared.session_id,
                subscriber_id = %id,
                "Subscriber joined closed broadcaster"
            );
        } else {
            slots.senders.insert(id, tx);
            let count = slots.senders.len();
            drop(slots);
            tracing::debug!(
                session_id = self.shared.session_id,
                subscriber_id = %id,
                subscribers = count,
                "Subscriber joined"
            );
        }

        Subscriber::new(id, rx, Arc::downgrade(&self.shared))
    }

    /// Remove a subscriber
    ///
    /// Idempotent: returns `false` if it was already gone or was joined to
    /// a different broadcaster.
    pub fn leave(&self, subscriber: &Subscriber) -> bool {
        if !subscriber.is_joined_to(&self.shared) {
            return false;
        }
        self.shared.remove(subscriber.id())
    }

    /// Offer a frame to every subscriber without waiting
    pub fn publish(&self, frame: Frame) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        let mut gone = Vec::new();

        let mut slots = self.shared.lock();
        if slots.closed {
            return outcome;
        }

        for (id, tx) in slots.senders.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => outcome.dropped += 1,
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in &gone {
            slots.senders.remove(id);
        }
        drop(slots);

        self.shared.published.fetch_add(1, Ordering::Relaxed);
        self.shared
            .delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.shared
            .dropped
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);

        outcome
    }

    /// End the stream for every subscriber and refuse new ones
    ///
    /// Returns how many subscribers were closed. Calling it again is a no-op.
    pub fn close_all(&self) -> usize {
        let mut slots = self.shared.lock();
        slots.closed = true;
        let senders = std::mem::take(&mut slots.senders);
        drop(slots);

        // Dropping the senders wakes every pending recv() with end-of-stream
        let count = senders.len();
        drop(senders);

        if count > 0 {
            tracing::info!(
                session_id = self.shared.session_id,
                subscribers = count,
                "Closed all subscribers"
            );
        }
        count
    }

    /// Whether `close_all` has run
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of joined subscribers
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().senders.len()
    }

    /// Snapshot of the fan-out counters
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.shared.published.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("session_id", &self.shared.session_id)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
