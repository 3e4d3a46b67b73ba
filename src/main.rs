//! CLI entry point for the feedcache tool.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use feedcache_core::download::filename_from_url;
use feedcache_core::{
    DownloadOutcome, EnclosureDownloader, FeedSet, FeedUpdateContext, FeedUpdater, HttpClient,
    UpdateOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

mod app_config;
mod cli;

use cli::{Cli, Command, EnclosureArgs, UpdateArgs, UpdateTuning};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let loaded = app_config::load_file_config(cli.config.as_deref())?;
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), loaded = loaded.config.is_some(), "config resolved");
    }
    let file_config = loaded.config.unwrap_or_default();

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Command::Update(args) => {
            let options = build_options(&file_config, &args.tuning);
            run_update(args, options, &cancel).await
        }
        Command::Enclosures(args) => {
            let options = build_options(&file_config, &args.tuning);
            let output_dir = args
                .output_dir
                .clone()
                .or_else(|| file_config.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            run_enclosures(args, options, &output_dir, &cancel).await
        }
    }
}

/// Defaults, then the config file, then command-line flags.
fn build_options(file_config: &app_config::FileConfig, tuning: &UpdateTuning) -> UpdateOptions {
    let mut options = UpdateOptions::default();
    file_config.apply_to(&mut options);

    if let Some(concurrency) = tuning.concurrency {
        options.max_concurrency = usize::from(concurrency);
    }
    if let Some(delay) = tuning.delay_ms {
        options.inter_feed_delay = Duration::from_millis(delay);
    }
    if let Some(secs) = tuning.timeout_secs {
        options.feed_timeout = Duration::from_secs(secs);
    }
    if let Some(agent) = &tuning.user_agent {
        options.user_agent.clone_from(agent);
    }
    if let Some(backoff) = tuning.backoff {
        options.backoff_increase = backoff.into();
    }
    if let Some(recovery) = tuning.recovery() {
        options.backoff_recovery = recovery;
    }
    options
        .tls_relaxed_hosts
        .extend(tuning.insecure_hosts.iter().cloned());
    options
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            cancel.cancel();
        }
    });
}

fn load_feeds(path: &Path) -> Result<FeedSet> {
    let mut feeds = FeedSet::new();
    let added = if path == Path::new("-") {
        feeds.load_from(io::stdin().lock())
    } else {
        let file = File::open(path)
            .with_context(|| format!("Failed to open feed list '{}'", path.display()))?;
        feeds.load_from(BufReader::new(file))
    };
    if added == 0 {
        bail!("No feed URIs found in '{}'", path.display());
    }
    Ok(feeds)
}

/// One line of `update` output.
#[derive(Debug, Serialize)]
struct ResultLine<'a> {
    feed: &'a str,
    name: &'a str,
    status: &'static str,
    http_status: Option<u16>,
    new_items: usize,
    unread: usize,
    skipped: bool,
}

async fn run_update(
    args: UpdateArgs,
    options: UpdateOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut feeds = load_feeds(&args.feeds)?;
    let updater = FeedUpdater::new(options).context("Invalid update options")?;
    let conditional = !args.tuning.force;

    loop {
        let results = feeds.update(&updater, conditional, cancel).await;
        print_results(&feeds, &results, args.json)?;
        info!(
            feeds = results.len(),
            failed = results.iter().filter(|r| r.status.is_failure()).count(),
            unread = feeds.unread_count(),
            "update cycle finished"
        );

        let Some(interval) = args.interval_secs else {
            break;
        };
        if cancel.is_cancelled() {
            break;
        }
        debug!(interval_secs = interval, "waiting for next cycle");
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(Duration::from_secs(interval)) => {}
        }
    }
    Ok(())
}

fn print_results(feeds: &FeedSet, results: &[FeedUpdateContext], json: bool) -> Result<()> {
    for result in results {
        let Some(feed) = Url::parse(&result.feed_uri)
            .ok()
            .and_then(|uri| feeds.get(&uri))
        else {
            continue;
        };
        let line = ResultLine {
            feed: &result.feed_uri,
            name: feed.name(),
            status: result.status.as_str(),
            http_status: result.last_status_code,
            new_items: result.new_items,
            unread: feed.unread_count(),
            skipped: result.network_skipped,
        };
        if json {
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!(
                "{:<14} {:>4} new {:>5} unread  {}  <{}>",
                line.status, line.new_items, line.unread, line.name, line.feed
            );
        }
    }
    Ok(())
}

async fn run_enclosures(
    args: EnclosureArgs,
    options: UpdateOptions,
    output_dir: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;

    let mut feeds = load_feeds(&args.feeds)?;
    let updater = FeedUpdater::new(options.clone()).context("Invalid update options")?;
    feeds
        .update(&updater, !args.tuning.force, cancel)
        .await;

    let strict = EnclosureDownloader::new(
        HttpClient::with_settings(&options.client_settings(""))
            .context("Failed to build HTTP client")?,
    );
    let relaxed = if options.tls_relaxed_hosts.is_empty() {
        None
    } else {
        let mut relaxed_settings = options.client_settings("");
        relaxed_settings.tls_relaxed = true;
        Some(EnclosureDownloader::new(
            HttpClient::with_settings(&relaxed_settings).context("Failed to build HTTP client")?,
        ))
    };

    let mut completed = Vec::new();
    let mut failed = 0usize;
    for feed in feeds.feeds() {
        for item in feed.items().iter().filter(|item| item.is_unread()) {
            let Some(enclosure) = item.enclosure() else {
                continue;
            };
            if cancel.is_cancelled() {
                break;
            }
            let Ok(link) = Url::parse(enclosure.link()) else {
                warn!(link = enclosure.link(), "skipping enclosure with invalid link");
                continue;
            };
            let destination = output_dir.join(filename_from_url(&link));
            let downloader = match &relaxed {
                Some(relaxed) if options.is_tls_relaxed(link.host_str().unwrap_or_default()) => {
                    relaxed
                }
                _ => &strict,
            };

            let bar = progress_bar(enclosure.declared_size(), item.name());
            let outcome = downloader
                .download(enclosure, &destination, cancel, |progress| {
                    if let Some(total) = progress.content_length {
                        bar.set_length(total);
                    }
                    bar.set_position(progress.bytes_written);
                })
                .await;
            bar.finish_and_clear();

            match &outcome {
                DownloadOutcome::Completed { path, bytes } => {
                    info!(path = %path.display(), bytes, "saved enclosure");
                    completed.push((feed.uri().clone(), item.link().to_string()));
                }
                DownloadOutcome::AlreadyExists => {
                    debug!(path = %destination.display(), "enclosure already present");
                }
                other => {
                    failed += 1;
                    warn!(item = item.name(), outcome = ?other, "enclosure not downloaded");
                }
            }
        }
    }

    for (feed_uri, link) in &completed {
        feeds.mark_item_read(feed_uri, link);
    }
    info!(
        completed = completed.len(),
        failed,
        unread = feeds.unread_count(),
        "enclosure run finished"
    );
    Ok(())
}

fn progress_bar(declared_size: Option<u64>, name: &str) -> ProgressBar {
    let bar = match declared_size {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(name.to_string());
    bar
}
