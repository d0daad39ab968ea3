//! Segmenting recorder
//!
//! The recorder is an ffmpeg process that pulls the live URL like any other
//! viewer, adds a silent audio track and a timestamp overlay, and writes
//! FLV segments named after their start time.

use std::io;

use super::supervisor::{CollaboratorSpec, StopMode};
use crate::server::config::RecorderConfig;

/// Segment file name pattern, expanded by ffmpeg's strftime support
pub const SEGMENT_PATTERN: &str = "%Y-%m-%d_%H-%M.flv";

/// Create the output directory if it is missing
pub async fn prepare(config: &RecorderConfig) -> io::Result<()> {
    tokio::fs::create_dir_all(&config.dir).await
}

/// Build the launch description for a recorder reading `live_url`
pub fn spec(config: &RecorderConfig, live_url: &str) -> CollaboratorSpec {
    CollaboratorSpec {
        name: "recorder",
        program: config.ffmpeg_path.clone(),
        args: args(config, live_url),
        startup_delay: std::time::Duration::ZERO,
        stop: StopMode::Interrupt {
            grace: config.stop_grace,
        },
    }
}

fn args(config: &RecorderConfig, live_url: &str) -> Vec<String> {
    let overlay = format!(
        r"format=yuv420p, drawtext=text='%{{localtime\:%Y/%m/%d %H\\\:%M\\\:%S}}':x=0:y=0:fontsize=24:fontcolor=white:fontfile='{}'",
        config.font_path.display()
    );
    let frame_rate = config.frame_rate.to_string();
    let segment = config.segment.as_secs().to_string();
    let output = config.dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned();

    [
        "-r",
        frame_rate.as_str(),
        "-i",
        live_url,
        "-f",
        "lavfi",
        "-i",
        "anullsrc",
        "-c:v",
        "libx264",
        "-vf",
        overlay.as_str(),
        "-crf",
        "30",
        "-c:a",
        "aac",
        "-b:a",
        "1k",
        "-f",
        "segment",
        "-segment_time",
        segment.as_str(),
        "-strftime",
        "1",
        output.as_str(),
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_recorder_args() {
        let mut config = RecorderConfig::new("/var/records");
        config.segment = Duration::from_secs(600);
        config.font_path = "/fonts/Mono.ttf".into();

        let spec = spec(&config, "http://127.0.0.1:40002/cam");
        assert_eq!(spec.name, "recorder");
        assert_eq!(spec.program, std::path::PathBuf::from("ffmpeg"));
        assert!(matches!(spec.stop, StopMode::Interrupt { .. }));

        let args = spec.args;
        assert_eq!(&args[..4], &["-r", "15", "-i", "http://127.0.0.1:40002/cam"]);
        assert_eq!(
            args[11],
            r"format=yuv420p, drawtext=text='%{localtime\:%Y/%m/%d %H\\\:%M\\\:%S}':x=0:y=0:fontsize=24:fontcolor=white:fontfile='/fonts/Mono.ttf'"
        );

        let seg = args.iter().position(|a| a == "-segment_time").unwrap();
        assert_eq!(args[seg + 1], "600");
        assert_eq!(args.last().unwrap(), "/var/records/%Y-%m-%d_%H-%M.flv");
    }

    #[tokio::test]
    async fn test_prepare_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RecorderConfig::new(tmp.path().join("a/b"));

        prepare(&config).await.unwrap();
        assert!(config.dir.is_dir());
        prepare(&config).await.unwrap();
    }
}
