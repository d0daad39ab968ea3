//! Frame fan-out for one producer session
//!
//! Every producer session owns exactly one [`Broadcaster`]. Viewers join it
//! and receive frames through a single-slot sink; the decode loop publishes
//! into it without ever waiting on a viewer.
//!
//! ```text
//!                         Broadcaster
//!                 ┌──────────────────────────┐
//!   publish() ──► │ senders: HashMap<Id,     │
//!   (try_send)    │   mpsc::Sender<Frame>(1)>│
//!                 └────┬────────┬────────┬───┘
//!                      │        │        │
//!                      ▼        ▼        ▼
//!                 [Subscriber][Subscriber][Subscriber]
//!                  recv()      recv()      recv()  ──► viewer socket
//! ```
//!
//! # Backpressure
//!
//! Each subscriber slot holds at most one frame. If the slot is still full
//! when the next frame is published, that frame is dropped for that viewer
//! only. A stalled viewer therefore misses frames but never delays the
//! producer or the other viewers, and memory per viewer stays bounded.

pub mod broadcaster;
pub mod subscriber;

pub use broadcaster::{Broadcaster, PublishOutcome};
pub use subscriber::{Delivery, Subscriber, SubscriberId};
