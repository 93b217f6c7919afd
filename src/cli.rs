//! Command-line interface definitions for the Toram news crawler.
//!
//! This module defines the CLI arguments and subcommands using the `clap`
//! crate. Flags override values from the optional YAML config file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the Toram news crawler.
///
/// # Examples
///
/// ```sh
/// # Crawl and deliver until Ctrl-C
/// toram_news --config config.yaml
///
/// # One crawl pass against a scratch database
/// toram_news --database /tmp/news.sqlite crawl
///
/// # Re-send a stored article
/// toram_news show 10234
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// SQLite database file (overrides `database_path`)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Seen-links file (overrides `seen_links_path`)
    #[arg(long)]
    pub seen_links: Option<PathBuf>,

    /// Chat webhook URL; without one, notifications are only logged
    #[arg(long, env = "NEWS_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Crawl and deliver on their intervals until interrupted (default)
    Run,
    /// Run a single crawl pass
    Crawl,
    /// Run a single delivery tick
    Deliver,
    /// Send one stored article by id, or a "not found" notice
    Show {
        /// Article id (the `information_id` of its URL)
        id: i64,
    },
}

impl Cli {
    /// The subcommand to run, [`Command::Run`] when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["toram_news"]);
        assert_eq!(cli.command(), Command::Run);
        assert!(cli.config.is_none());
        assert!(cli.database.is_none());
    }

    #[test]
    fn test_cli_short_config_flag() {
        let cli = Cli::parse_from(["toram_news", "-c", "/etc/toram/config.yaml", "crawl"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/toram/config.yaml")));
        assert_eq!(cli.command(), Command::Crawl);
    }

    #[test]
    fn test_cli_show_takes_id() {
        let cli = Cli::parse_from(["toram_news", "--seen-links", "seen.txt", "show", "10234"]);
        assert_eq!(cli.command(), Command::Show { id: 10234 });
        assert_eq!(cli.seen_links, Some(PathBuf::from("seen.txt")));
    }

    #[test]
    fn test_cli_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["toram_news", "show", "abc"]).is_err());
    }
}
