//! Configuration management for the relay.
//!
//! Provides centralized configuration options for controlling:
//! - Worker pool size
//! - Directory and thumbnail paths
//! - Admission bounds
//! - Progress cadence and session lifetime
//! - Rate-limit handling

use crate::admission::GIB;
use crate::error::{AppError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What a worker does after waiting out a rate-limit signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Wait, then drop the job without telling the submitter.
    Drop,
    /// Wait, run the job once more, and report to the submitter if it is
    /// rate-limited again.
    RetryOnce,
}

impl FromStr for RateLimitPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "retry_once" | "retry-once" => Ok(Self::RetryOnce),
            other => Err(AppError::Config(format!("unknown rate limit policy '{other}'"))),
        }
    }
}

/// Configuration for the relay.
///
/// # Examples
///
/// ```
/// use relay::Config;
///
/// let config = Config::default();
/// assert_eq!(config.workers, 3);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workers: usize,
    pub download_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub thumbnail_path: PathBuf,
    pub admin_id: Option<u64>,
    pub min_file_size: u64,
    pub max_file_size: u64,
    pub progress_interval_ms: u64,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
    pub rate_limit_policy: RateLimitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 3,
            download_dir: PathBuf::from("downloads"),
            outbox_dir: PathBuf::from("outbox"),
            thumbnail_path: PathBuf::from("thumbnail.jpg"),
            admin_id: None,
            min_file_size: GIB,
            max_file_size: 4 * GIB,
            progress_interval_ms: 3_000,
            session_ttl_secs: 900,
            max_sessions: 10_000,
            rate_limit_policy: RateLimitPolicy::RetryOnce,
        }
    }
}

impl Config {
    /// Builds a configuration from `RELAY_*` environment variables, falling
    /// back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("RELAY_WORKERS") {
            config.workers = parse("RELAY_WORKERS", &v)?;
        }
        if let Some(v) = lookup("RELAY_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RELAY_OUTBOX_DIR") {
            config.outbox_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RELAY_THUMBNAIL_PATH") {
            config.thumbnail_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RELAY_ADMIN_ID") {
            config.admin_id = Some(parse("RELAY_ADMIN_ID", &v)?);
        }
        if let Some(v) = lookup("RELAY_MIN_FILE_SIZE") {
            config.min_file_size = parse("RELAY_MIN_FILE_SIZE", &v)?;
        }
        if let Some(v) = lookup("RELAY_MAX_FILE_SIZE") {
            config.max_file_size = parse("RELAY_MAX_FILE_SIZE", &v)?;
        }
        if let Some(v) = lookup("RELAY_PROGRESS_INTERVAL_MS") {
            config.progress_interval_ms = parse("RELAY_PROGRESS_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("RELAY_SESSION_TTL_SECS") {
            config.session_ttl_secs = parse("RELAY_SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("RELAY_MAX_SESSIONS") {
            config.max_sessions = parse("RELAY_MAX_SESSIONS", &v)?;
        }
        if let Some(v) = lookup("RELAY_RATE_LIMIT_POLICY") {
            config.rate_limit_policy = v.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AppError::Config("workers must be at least 1".into()));
        }
        if self.min_file_size > self.max_file_size {
            return Err(AppError::Config(format!(
                "min_file_size ({}) exceeds max_file_size ({})",
                self.min_file_size, self.max_file_size
            )));
        }
        if self.session_ttl_secs == 0 {
            return Err(AppError::Config("session_ttl_secs must be at least 1".into()));
        }
        if self.max_sessions == 0 {
            return Err(AppError::Config("max_sessions must be at least 1".into()));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{key} has invalid value '{value}'")))
}
