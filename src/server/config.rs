//! Relay configuration

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::Authenticator;

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the producer (camera) connects to
    pub producer_addr: SocketAddr,

    /// Address viewers connect to
    pub viewer_addr: SocketAddr,

    /// HTTP path of the live stream
    pub viewer_path: String,

    /// Producer authentication
    pub auth: AuthConfig,

    /// Drop a viewer that received no frame within this window (None = never)
    pub viewer_timeout: Option<Duration>,

    /// Largest accepted part body
    pub max_frame_size: usize,

    /// Enable TCP_NODELAY on producer sockets
    pub tcp_nodelay: bool,

    /// How long a superseded viewer endpoint may take to drain
    pub endpoint_shutdown_grace: Duration,

    /// Directory served under `<viewer_path>/records/` (None = no archive)
    pub archive_dir: Option<PathBuf>,

    /// Recorder collaborator (None = disabled)
    pub recorder: Option<RecorderConfig>,

    /// Restreamer collaborator (None = disabled)
    pub restreamer: Option<RestreamerConfig>,
}

/// Producer preamble settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Whether a preamble is required
    pub enabled: bool,

    /// Expected preamble bytes
    pub token: Vec<u8>,

    /// Deadline for the whole preamble
    pub timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: DEFAULT_AUTH_TOKEN.to_vec(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl AuthConfig {
    /// Build the authenticator for new producer connections
    pub fn authenticator(&self) -> Authenticator {
        if self.enabled {
            Authenticator::new(self.token.clone(), self.timeout)
        } else {
            Authenticator::disabled()
        }
    }
}

/// Recorder (segmenting ffmpeg) settings
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Output directory for segments
    pub dir: PathBuf,

    /// Length of one segment
    pub segment: Duration,

    /// Input frame rate passed to ffmpeg
    pub frame_rate: u32,

    /// ffmpeg executable
    pub ffmpeg_path: PathBuf,

    /// Font used for the timestamp overlay
    pub font_path: PathBuf,

    /// Time between SIGINT and kill on teardown
    pub stop_grace: Duration,
}

impl RecorderConfig {
    /// Recorder writing into `dir` with default settings
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment: Duration::from_secs(3600),
            frame_rate: 15,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            font_path: PathBuf::from("Monaco.ttf"),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Restreamer settings
#[derive(Debug, Clone)]
pub struct RestreamerConfig {
    /// Executable that pulls the live URL and pushes it onward
    pub program: PathBuf,

    /// Ingestion URLs, one process each
    pub targets: Vec<String>,

    /// Input frame rate passed to the program
    pub frame_rate: u32,

    /// Wait before starting, so the serving path is up
    pub startup_delay: Duration,
}

impl RestreamerConfig {
    /// Restreamer pushing to `targets` with default settings
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            targets,
            frame_rate: 15,
            startup_delay: Duration::from_secs(2),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            producer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 40001),
            viewer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 40002),
            viewer_path: "/cam".to_string(),
            auth: AuthConfig::default(),
            viewer_timeout: Some(Duration::from_secs(10)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tcp_nodelay: true,
            endpoint_shutdown_grace: Duration::from_secs(5),
            archive_dir: None,
            recorder: None,
            restreamer: None,
        }
    }
}

impl RelayConfig {
    /// Set the producer bind address
    pub fn bind_producer(mut self, addr: SocketAddr) -> Self {
        self.producer_addr = addr;
        self
    }

    /// Set the viewer bind address
    pub fn bind_viewer(mut self, addr: SocketAddr) -> Self {
        self.viewer_addr = addr;
        self
    }

    /// Set the live stream path
    pub fn viewer_path(mut self, path: impl Into<String>) -> Self {
        self.viewer_path = path.into();
        self
    }

    /// Require `token` as the producer preamble
    pub fn auth_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.auth.enabled = true;
        self.auth.token = token.into();
        self
    }

    /// Accept producers without a preamble
    pub fn disable_auth(mut self) -> Self {
        self.auth.enabled = false;
        self
    }

    /// Set the preamble deadline
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth.timeout = timeout;
        self
    }

    /// Set the viewer inactivity timeout
    pub fn viewer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.viewer_timeout = timeout;
        self
    }

    /// Set the largest accepted frame
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the drain deadline for superseded viewer endpoints
    pub fn endpoint_shutdown_grace(mut self, grace: Duration) -> Self {
        self.endpoint_shutdown_grace = grace;
        self
    }

    /// Serve `dir` as the archive
    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Enable the recorder
    pub fn recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Enable the restreamer
    pub fn restreamer(mut self, restreamer: RestreamerConfig) -> Self {
        self.restreamer = Some(restreamer);
        self
    }

    /// Path the archive is mounted at
    pub fn records_path(&self) -> String {
        format!("{}/records", self.viewer_path.trim_end_matches('/'))
    }

    /// URL collaborators use to pull the live stream from `bound`
    pub fn live_url(&self, bound: SocketAddr) -> String {
        let mut addr = bound;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        format!("http://{}{}", addr, self.viewer_path)
    }

    /// Check values that would otherwise fail later at runtime
    pub fn validate(&self) -> Result<()> {
        if !self.viewer_path.starts_with('/') || self.viewer_path.len() < 2 {
            return Err(Error::Config(format!(
                "viewer path must start with '/' and name a resource: {:?}",
                self.viewer_path
            )));
        }
        if self.viewer_path.ends_with('/') {
            return Err(Error::Config(format!(
                "viewer path must not end with '/': {:?}",
                self.viewer_path
            )));
        }
        if self.auth.enabled && self.auth.token.is_empty() {
            return Err(Error::Config("auth token is empty".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(Error::Config("max frame size is zero".to_string()));
        }
        if let Some(restreamer) = &self.restreamer {
            if restreamer.targets.is_empty() {
                return Err(Error::Config("restreamer has no target URL".to_string()));
            }
        }
        Ok(())
    }
}
