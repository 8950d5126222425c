//! Command-line interface for faceveil
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Real-time privacy filter for live video streams
#[derive(Parser, Debug)]
#[command(
    name = "faceveil",
    version,
    about = "Blurs non-consenting faces in a live A/V stream"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Ingress URL override (e.g. rtmp://0.0.0.0:1935/live/stream)
    #[arg(long, global = true, value_name = "URL")]
    pub ingress: Option<String>,

    /// Egress URL override (e.g. rtsp://127.0.0.1:8554/filtered)
    #[arg(long, global = true, value_name = "URL")]
    pub egress: Option<String>,

    /// Consent capture directory override
    #[arg(long, global = true, value_name = "DIR")]
    pub capture_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the privacy filter pipeline (default)
    Run,
    /// Validate the configuration and exit
    CheckConfig,
    /// List consent captures currently on disk
    ListCaptures,
}

impl Cli {
    /// Merge CLI overrides into a loaded configuration.
    pub fn apply_overrides(&self, mut config: crate::config::Config) -> crate::config::Config {
        if let Some(url) = &self.ingress {
            config.stream.ingress_url = url.clone();
        }
        if let Some(url) = &self.egress {
            config.stream.egress_url = url.clone();
        }
        if let Some(dir) = &self.capture_dir {
            config.stream.capture_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_parse_no_args() {
        let cli = Cli::parse_from(["faceveil"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_run_subcommand() {
        let cli = Cli::parse_from(["faceveil", "run"]);
        assert!(matches!(cli.command, Some(Commands::Run)));
    }

    #[test]
    fn test_parse_check_config() {
        let cli = Cli::parse_from(["faceveil", "check-config", "--config", "/etc/fv.toml"]);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/fv.toml")));
    }

    #[test]
    fn test_url_overrides() {
        let cli = Cli::parse_from([
            "faceveil",
            "run",
            "--ingress",
            "rtmp://0.0.0.0:2000/live/a",
            "--egress",
            "rtsp://127.0.0.1:8554/b",
            "--capture-dir",
            "/tmp/captures",
            "--log-level",
            "debug",
        ]);

        let config = cli.apply_overrides(Config::default());
        assert_eq!(config.stream.ingress_url, "rtmp://0.0.0.0:2000/live/a");
        assert_eq!(config.stream.egress_url, "rtsp://127.0.0.1:8554/b");
        assert_eq!(config.stream.capture_dir, PathBuf::from("/tmp/captures"));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let cli = Cli::parse_from(["faceveil", "run"]);
        let config = cli.apply_overrides(Config::default());
        assert_eq!(config, Config::default());
    }
}
