//! External collaborator processes
//!
//! Recorder and restreamer are ordinary viewers of the live URL running as
//! child processes. They are owned by the producer session that started
//! them and stopped on every exit path from streaming. A collaborator that
//! fails to start is logged and skipped.

pub mod recorder;
pub mod restreamer;
pub mod supervisor;

pub use supervisor::{CollaboratorHandle, CollaboratorSpec, StopMode};
