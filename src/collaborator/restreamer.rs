//! Restreamer
//!
//! Pulls the live URL and pushes it to an ingestion endpoint as FLV. One
//! process runs per target, so a dead target does not affect the others.

use super::supervisor::{CollaboratorSpec, StopMode};
use crate::server::config::RestreamerConfig;

/// Build one launch description per configured target
pub fn specs(config: &RestreamerConfig, live_url: &str) -> Vec<CollaboratorSpec> {
    config
        .targets
        .iter()
        .map(|target| CollaboratorSpec {
            name: "restreamer",
            program: config.program.clone(),
            args: args(config, live_url, target),
            startup_delay: config.startup_delay,
            stop: StopMode::Kill,
        })
        .collect()
}

fn args(config: &RestreamerConfig, live_url: &str, target: &str) -> Vec<String> {
    let frame_rate = config.frame_rate.to_string();

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
        "-preset",
        "veryfast",
        "-tune",
        "zerolatency",
        "-pix_fmt",
        "yuv420p",
        "-c:a",
        "aac",
        "-b:a",
        "1k",
        "-f",
        "flv",
        target,
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
    fn test_one_spec_per_target() {
        let config = RestreamerConfig::new(vec![
            "rtmp://ingest-a/live/key".to_string(),
            "rtmp://ingest-b/live/key".to_string(),
        ]);

        let specs = specs(&config, "http://127.0.0.1:40002/cam");
        assert_eq!(specs.len(), 2);
        for (spec, target) in specs.iter().zip(&config.targets) {
            assert_eq!(spec.name, "restreamer");
            assert_eq!(spec.stop, StopMode::Kill);
            assert_eq!(spec.startup_delay, Duration::from_secs(2));
            assert_eq!(&spec.args[2..4], &["-i", "http://127.0.0.1:40002/cam"]);
            assert_eq!(spec.args.last(), Some(target));
        }
    }
}
