//! Command-line interface for the relay.
//!
//! Flags override the matching values from the YAML config file. Every flag
//! can also be set through an environment variable.

use clap::Parser;
use std::path::PathBuf;

/// Periodically relay the latest item per category from RSS feeds.
///
/// # Examples
///
/// ```sh
/// # Run forever with the default config file
/// news_relay
///
/// # One dry cycle against a custom config
/// news_relay --config ./relay.yaml --once
///
/// # Write deliveries as JSON files every five minutes
/// news_relay --outbox-dir ./outbox --interval-secs 300
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "NEWS_RELAY_CONFIG", default_value = "news_relay.yaml")]
    pub config: PathBuf,

    /// Delivered-URL ledger file (overrides `ledger_path`)
    #[arg(short, long, env = "NEWS_RELAY_LEDGER")]
    pub ledger: Option<PathBuf>,

    /// Write delivered items as JSON under this directory instead of only logging them
    #[arg(short, long, env = "NEWS_RELAY_OUTBOX")]
    pub outbox_dir: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between cycles (overrides `schedule.interval_ms`)
    #[arg(long, env = "NEWS_RELAY_INTERVAL_SECS")]
    pub interval_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["news_relay"]);
        assert_eq!(cli.config, PathBuf::from("news_relay.yaml"));
        assert!(cli.ledger.is_none());
        assert!(cli.outbox_dir.is_none());
        assert!(!cli.once);
        assert!(cli.interval_secs.is_none());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "news_relay",
            "--config",
            "/etc/relay.yaml",
            "--ledger",
            "/var/lib/relay/sent.txt",
            "--outbox-dir",
            "./outbox",
            "--once",
            "--interval-secs",
            "300",
        ]);

        assert_eq!(cli.config, PathBuf::from("/etc/relay.yaml"));
        assert_eq!(cli.ledger, Some(PathBuf::from("/var/lib/relay/sent.txt")));
        assert_eq!(cli.outbox_dir.as_deref(), Some("./outbox"));
        assert!(cli.once);
        assert_eq!(cli.interval_secs, Some(300));
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["news_relay", "-c", "a.yaml", "-l", "b.txt", "-o", "out"]);
        assert_eq!(cli.config, PathBuf::from("a.yaml"));
        assert_eq!(cli.ledger, Some(PathBuf::from("b.txt")));
        assert_eq!(cli.outbox_dir.as_deref(), Some("out"));
    }
}
