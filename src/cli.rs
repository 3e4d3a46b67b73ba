//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use feedcache_core::{BackoffIncrease, BackoffRecovery};

/// Fetch and cache web feeds politely.
///
/// Feedcache updates Atom/RSS feeds without re-downloading unchanged content,
/// backs off when servers rate-limit it, and downloads podcast enclosures
/// straight to disk.
#[derive(Parser, Debug)]
#[command(name = "feedcache")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Read settings from this TOML file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Update feeds and print one status line per feed
    Update(UpdateArgs),
    /// Update feeds, then download enclosures of unread items
    Enclosures(EnclosureArgs),
}

/// Update tuning shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct UpdateTuning {
    /// Feed hosts updated in parallel (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Pause between requests to the same host in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub delay_ms: Option<u64>,

    /// Time budget for one feed in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout_secs: Option<u64>,

    /// Override the User-Agent header
    #[arg(long)]
    pub user_agent: Option<String>,

    /// How the backoff grows on repeated 429 responses
    #[arg(long, value_enum)]
    pub backoff: Option<BackoffArg>,

    /// Reset the backoff once a rate-limited feed answers normally
    #[arg(long)]
    pub reset_backoff: bool,

    /// Skip TLS certificate checks for this host and its subdomains (repeatable)
    #[arg(long = "insecure-host", value_name = "HOST")]
    pub insecure_hosts: Vec<String>,

    /// Ignore Last-Modified cooldowns and send no validators
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Feed list file (one URI per line, `#` comments); `-` reads stdin
    #[arg(value_name = "FEEDS")]
    pub feeds: PathBuf,

    /// Print results as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Repeat the update every N seconds until interrupted
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_secs: Option<u64>,

    #[command(flatten)]
    pub tuning: UpdateTuning,
}

#[derive(Args, Debug)]
pub struct EnclosureArgs {
    /// Feed list file (one URI per line, `#` comments); `-` reads stdin
    #[arg(value_name = "FEEDS")]
    pub feeds: PathBuf,

    /// Directory enclosures are written to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub tuning: UpdateTuning,
}

/// CLI spelling of [`BackoffIncrease`].
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffArg {
    Double,
    AddHour,
    AddDay,
}

impl From<BackoffArg> for BackoffIncrease {
    fn from(value: BackoffArg) -> Self {
        match value {
            BackoffArg::Double => Self::Double,
            BackoffArg::AddHour => Self::AddHour,
            BackoffArg::AddDay => Self::AddDay,
        }
    }
}

impl UpdateTuning {
    /// Recovery strategy requested on the command line, if any.
    #[must_use]
    pub fn recovery(&self) -> Option<BackoffRecovery> {
        self.reset_backoff.then_some(BackoffRecovery::Reset)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_update_parses_feed_list_and_flags() {
        let cli = Cli::try_parse_from([
            "feedcache",
            "update",
            "feeds.txt",
            "--json",
            "--interval-secs",
            "300",
            "-c",
            "8",
        ])
        .unwrap();
        let Command::Update(args) = cli.command else {
            panic!("expected update subcommand");
        };
        assert_eq!(args.feeds, PathBuf::from("feeds.txt"));
        assert!(args.json);
        assert_eq!(args.interval_secs, Some(300));
        assert_eq!(args.tuning.concurrency, Some(8));
        assert!(!args.tuning.force);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["feedcache", "-vv", "update", "f.txt"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["feedcache", "update", "f.txt", "--verbose"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let cli = Cli::try_parse_from(["feedcache", "-q", "update", "f.txt"]).unwrap();
        assert!(cli.quiet);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        for bad in ["0", "101"] {
            let err = Cli::try_parse_from(["feedcache", "update", "f.txt", "-c", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_enclosures_with_backoff_and_hosts() {
        let cli = Cli::try_parse_from([
            "feedcache",
            "enclosures",
            "feeds.txt",
            "--output-dir",
            "out",
            "--backoff",
            "add-day",
            "--reset-backoff",
            "--insecure-host",
            "a.example",
            "--insecure-host",
            "b.example",
        ])
        .unwrap();
        let Command::Enclosures(args) = cli.command else {
            panic!("expected enclosures subcommand");
        };
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
        assert_eq!(args.tuning.backoff, Some(BackoffArg::AddDay));
        assert_eq!(args.tuning.recovery(), Some(BackoffRecovery::Reset));
        assert_eq!(args.tuning.insecure_hosts.len(), 2);
    }

    #[test]
    fn test_cli_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["feedcache"]).is_err());
    }
}
