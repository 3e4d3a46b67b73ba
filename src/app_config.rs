//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use feedcache_core::{BackoffIncrease, BackoffRecovery, UpdateOptions};

/// TOML-backed file configuration for feedcache defaults.
///
/// Every key is optional; CLI flags override whatever is set here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Host groups updated in parallel (1..=100).
    pub concurrency: Option<usize>,
    /// Pause between requests to one host, in milliseconds.
    pub inter_feed_delay_ms: Option<u64>,
    /// Time budget for one feed update, in seconds.
    pub feed_timeout_secs: Option<u64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// `User-Agent` override.
    pub user_agent: Option<String>,
    /// Backoff growth on repeated 429s.
    pub backoff_increase: Option<BackoffIncrease>,
    /// Backoff behavior after a limited feed recovers.
    pub backoff_recovery: Option<BackoffRecovery>,
    /// Backoff applied on the first 429, in seconds.
    pub initial_backoff_secs: Option<u64>,
    /// Delay before retrying a feed that timed out, in seconds (0 disables).
    pub timeout_cooldown_secs: Option<u64>,
    /// Hosts whose TLS certificates are not verified.
    pub tls_relaxed_hosts: Option<Vec<String>>,
    /// Default output directory for enclosure downloads.
    pub output_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }
        if let Some(delay) = self.inter_feed_delay_ms
            && delay > 60_000
        {
            bail!(
                "Invalid config value for `inter_feed_delay_ms`: {delay}. Expected range: 0..=60000"
            );
        }
        validate_timeout_secs("feed_timeout_secs", self.feed_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(agent) = &self.user_agent
            && agent.trim().is_empty()
        {
            bail!("Invalid config value for `user_agent`: must not be empty");
        }
        Ok(())
    }

    /// Applies the file values on top of `options`.
    pub fn apply_to(&self, options: &mut UpdateOptions) {
        if let Some(concurrency) = self.concurrency {
            options.max_concurrency = concurrency;
        }
        if let Some(delay) = self.inter_feed_delay_ms {
            options.inter_feed_delay = Duration::from_millis(delay);
        }
        if let Some(secs) = self.feed_timeout_secs {
            options.feed_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connect_timeout_secs {
            options.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.read_timeout_secs {
            options.read_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = &self.user_agent {
            options.user_agent.clone_from(agent);
        }
        if let Some(increase) = self.backoff_increase {
            options.backoff_increase = increase;
        }
        if let Some(recovery) = self.backoff_recovery {
            options.backoff_recovery = recovery;
        }
        if let Some(secs) = self.initial_backoff_secs {
            options.initial_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout_cooldown_secs {
            options.timeout_cooldown = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(hosts) = &self.tls_relaxed_hosts {
            options.tls_relaxed_hosts.clone_from(hosts);
        }
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/feedcache/config.toml`
/// 2. `$HOME/.config/feedcache/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("feedcache")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("feedcache")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the explicit path, or the default path if present.
///
/// An explicit path must exist; a missing default file is not an error.
pub fn load_file_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = read_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig { path, config: None });
    };
    if !path_ref.exists() {
        return Ok(LoadedConfig { path, config: None });
    }

    let config = read_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

fn read_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}
