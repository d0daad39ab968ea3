//! Producer sessions
//!
//! A session is the lifetime binding of one producer connection to one
//! broadcaster. See [`state`] for the phase diagram.

pub mod producer;
pub mod state;

pub use producer::{ProducerSession, SessionEnd, SessionHandle, SessionSummary};
pub use state::{SessionPhase, SessionState};
