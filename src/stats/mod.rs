//! Statistics for producer sessions and their broadcasters

pub mod metrics;

pub use metrics::{BroadcastStats, SessionStats};
