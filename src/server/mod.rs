//! Relay server
//!
//! - [`listener`]: producer accept loop and session replacement
//! - [`viewer`]: per-session HTTP serving path
//! - [`archive`]: recording directory listing and files
//! - [`config`]: configuration

pub mod archive;
pub mod config;
pub mod listener;
pub mod viewer;

pub use config::{AuthConfig, RecorderConfig, RelayConfig, RestreamerConfig};
pub use listener::RelayServer;
pub use viewer::ViewerEndpoint;
