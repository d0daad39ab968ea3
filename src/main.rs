//! mjpeg-relay binary
//!
//! Run with: mjpeg-relay [OPTIONS]
//!
//!   mjpeg-relay                                  # camera on :40001, viewers on :40002/cam
//!   mjpeg-relay --record-dir ./records           # also record hourly FLV segments
//!   mjpeg-relay --restream-url rtmp://host/app/key

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use mjpeg_relay::server::{RecorderConfig, RestreamerConfig};
use mjpeg_relay::{RelayConfig, RelayServer};

/// Relay a camera's MJPEG stream to HTTP viewers
#[derive(Parser, Debug)]
#[command(name = "mjpeg-relay", version, about)]
struct Cli {
    /// Address the camera connects to
    #[arg(long, default_value = "0.0.0.0:40001")]
    cam_addr: SocketAddr,

    /// Address viewers connect to
    #[arg(long, default_value = "0.0.0.0:40002")]
    mjpeg_addr: SocketAddr,

    /// HTTP path of the live stream
    #[arg(long, default_value = "/cam")]
    mjpeg_path: String,

    /// Frame rate handed to ffmpeg collaborators
    #[arg(long = "mjpeg-fr", default_value_t = 15)]
    frame_rate: u32,

    /// Record into this directory (also served under <mjpeg-path>/records/)
    #[arg(long)]
    record_dir: Option<PathBuf>,

    /// Recording segment length in seconds
    #[arg(long = "record-seg", default_value_t = 3600)]
    record_segment: u64,

    /// ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg_path: PathBuf,

    /// Font for the recording timestamp overlay
    #[arg(long, default_value = "Monaco.ttf")]
    font_path: PathBuf,

    /// Producer token as hex (default: the camera firmware token)
    #[arg(long, value_parser = parse_token, conflicts_with = "no_auth")]
    auth_token: Option<Token>,

    /// Accept producers without a token
    #[arg(long)]
    no_auth: bool,

    /// Seconds a producer has to send its token
    #[arg(long, default_value_t = 10)]
    auth_timeout: u64,

    /// Seconds without a frame before a viewer is dropped (0 = never)
    #[arg(long, default_value_t = 10)]
    viewer_timeout: u64,

    /// Push the live stream to this URL (repeatable)
    #[arg(long = "restream-url")]
    restream_urls: Vec<String>,

    /// Seconds to wait before starting restreamers
    #[arg(long, default_value_t = 2)]
    restream_delay: u64,
}

#[derive(Debug, Clone)]
struct Token(Vec<u8>);

fn parse_token(s: &str) -> Result<Token, String> {
    let bytes = hex::decode(s.trim()).map_err(|e| format!("invalid hex token: {}", e))?;
    if bytes.is_empty() {
        return Err("token is empty".to_string());
    }
    Ok(Token(bytes))
}

impl Cli {
    fn into_config(self) -> RelayConfig {
        let mut config = RelayConfig::default()
            .bind_producer(self.cam_addr)
            .bind_viewer(self.mjpeg_addr)
            .viewer_path(self.mjpeg_path)
            .auth_timeout(Duration::from_secs(self.auth_timeout))
            .viewer_timeout(match self.viewer_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            });

        if let Some(Token(token)) = self.auth_token {
            config = config.auth_token(token);
        }
        if self.no_auth {
            config = config.disable_auth();
        }

        if let Some(dir) = self.record_dir {
            let mut recorder = RecorderConfig::new(dir.clone());
            recorder.segment = Duration::from_secs(self.record_segment);
            recorder.frame_rate = self.frame_rate;
            recorder.ffmpeg_path = self.ffmpeg_path.clone();
            recorder.font_path = self.font_path;
            config = config.archive_dir(dir).recorder(recorder);
        }

        if !self.restream_urls.is_empty() {
            let mut restreamer = RestreamerConfig::new(self.restream_urls);
            restreamer.program = self.ffmpeg_path;
            restreamer.frame_rate = self.frame_rate;
            restreamer.startup_delay = Duration::from_secs(self.restream_delay);
            config = config.restreamer(restreamer);
        }

        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let server = match RelayServer::bind(cli.into_config()).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start relay");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run_until(shutdown_signal()).await {
        tracing::error!(error = %e, "Relay failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let config = Cli::parse_from(["mjpeg-relay"]).into_config();

        assert_eq!(config.producer_addr.port(), 40001);
        assert_eq!(config.viewer_addr.port(), 40002);
        assert_eq!(config.viewer_path, "/cam");
        assert!(config.auth.enabled);
        assert!(config.recorder.is_none());
        assert!(config.archive_dir.is_none());
        assert!(config.restreamer.is_none());
    }

    #[test]
    fn test_cli_full() {
        let config = Cli::parse_from([
            "mjpeg-relay",
            "--cam-addr",
            "127.0.0.1:5000",
            "--mjpeg-path",
            "/live",
            "--record-dir",
            "/tmp/rec",
            "--record-seg",
            "60",
            "--auth-token",
            "deadbeef",
            "--viewer-timeout",
            "0",
            "--restream-url",
            "rtmp://a/live/1",
            "--restream-url",
            "rtmp://b/live/2",
        ])
        .into_config();

        assert_eq!(config.producer_addr, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.viewer_path, "/live");
        assert_eq!(config.auth.token, vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(config.viewer_timeout.is_none());

        let recorder = config.recorder.unwrap();
        assert_eq!(recorder.segment, Duration::from_secs(60));
        assert_eq!(config.archive_dir, Some(PathBuf::from("/tmp/rec")));
        assert_eq!(config.restreamer.unwrap().targets.len(), 2);
    }

    #[test]
    fn test_cli_rejects_bad_token() {
        assert!(Cli::try_parse_from(["mjpeg-relay", "--auth-token", "xyz"]).is_err());
        assert!(Cli::try_parse_from(["mjpeg-relay", "--auth-token", "00", "--no-auth"]).is_err());
    }
}
