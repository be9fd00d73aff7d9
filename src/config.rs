//! Process settings
//!
//! Everything is read from environment variables (see [`crate::util`] for the
//! names and defaults). [`Settings::from_lookup`] takes any lookup function so
//! settings can be built without touching the real environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use crate::util::{self, non_empty, parse_optional, parse_or};
use crate::{SubscriberId, Thresholds};

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("{name}={value:?} is not a valid {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("default thresholds must lie within 0..=100 with lower < upper (got upper={upper}, lower={lower})")]
    InvalidDefaultBand { upper: f64, lower: f64 },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("unknown storage backend {0:?} (expected \"file\" or \"none\")")]
    UnknownBackend(String),
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    None,

    /// JSON files, replaced atomically on every save
    File {
        subscribers_path: PathBuf,
        state_path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            subscribers_path: PathBuf::from(util::DEFAULT_SUBSCRIBERS_FILE_PATH),
            state_path: PathBuf::from(util::DEFAULT_STATE_FILE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// `None` disables the file layer.
    pub file_path: Option<PathBuf>,
    pub backup_days: usize,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSettings {
    pub name: String,
    pub source_url: String,
    pub attempts: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub telegram_bot_token: String,
    pub telegram_api_base: String,
    /// Chat subscribed automatically at startup.
    pub seed_chat_id: Option<SubscriberId>,
    pub defaults: Thresholds,
    pub check_interval: Duration,
    pub request_timeout: Duration,
    pub updates_poll: Duration,
    pub poll_interval: Duration,
    pub metric: MetricSettings,
    pub storage: StorageConfig,
    pub log: LogSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram_bot_token = non_empty(&lookup, util::TELEGRAM_BOT_TOKEN)
            .ok_or(SettingsError::Missing(util::TELEGRAM_BOT_TOKEN))?;

        let telegram_api_base = non_empty(&lookup, util::TELEGRAM_API_BASE)
            .unwrap_or_else(|| util::DEFAULT_TELEGRAM_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let seed_chat_id = parse_optional(&lookup, util::TELEGRAM_CHAT_ID)?;

        let defaults = Thresholds::new(
            parse_or(&lookup, util::UPPER_THRESHOLD_PERCENT, util::DEFAULT_UPPER_THRESHOLD)?,
            parse_or(&lookup, util::LOWER_THRESHOLD_PERCENT, util::DEFAULT_LOWER_THRESHOLD)?,
        );
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(defaults.upper) || !in_range(defaults.lower) || !defaults.is_valid() {
            return Err(SettingsError::InvalidDefaultBand {
                upper: defaults.upper,
                lower: defaults.lower,
            });
        }

        let check_interval = positive_seconds(
            &lookup,
            util::CHECK_INTERVAL_SECONDS,
            util::DEFAULT_CHECK_INTERVAL_SECONDS,
        )?;
        let request_timeout = positive_seconds(
            &lookup,
            util::REQUEST_TIMEOUT_SECONDS,
            util::DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;
        let updates_poll = Duration::from_secs(parse_or(
            &lookup,
            util::UPDATES_POLL_SECONDS,
            util::DEFAULT_UPDATES_POLL_SECONDS,
        )?);
        let poll_interval = parse_optional::<_, u64>(&lookup, util::POLL_INTERVAL_SECONDS)?
            .map(Duration::from_secs)
            .unwrap_or(updates_poll);

        let attempts = parse_or(
            &lookup,
            util::METRIC_FETCH_ATTEMPTS,
            util::DEFAULT_METRIC_FETCH_ATTEMPTS,
        )?;
        if attempts == 0 {
            return Err(SettingsError::Zero {
                name: util::METRIC_FETCH_ATTEMPTS,
            });
        }
        let metric = MetricSettings {
            name: non_empty(&lookup, util::METRIC_NAME)
                .unwrap_or_else(|| util::DEFAULT_METRIC_NAME.to_string()),
            source_url: non_empty(&lookup, util::METRIC_SOURCE_URL)
                .unwrap_or_else(|| util::DEFAULT_METRIC_SOURCE_URL.to_string()),
            attempts,
            backoff: Duration::from_millis(parse_or(
                &lookup,
                util::METRIC_FETCH_BACKOFF_MS,
                util::DEFAULT_METRIC_FETCH_BACKOFF_MS,
            )?),
        };

        let storage = match non_empty(&lookup, util::STORAGE_BACKEND)
            .map(|backend| backend.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("file") => StorageConfig::File {
                subscribers_path: non_empty(&lookup, util::SUBSCRIBERS_FILE_PATH)
                    .unwrap_or_else(|| util::DEFAULT_SUBSCRIBERS_FILE_PATH.to_string())
                    .into(),
                state_path: non_empty(&lookup, util::STATE_FILE_PATH)
                    .unwrap_or_else(|| util::DEFAULT_STATE_FILE_PATH.to_string())
                    .into(),
            },
            Some("none") | Some("memory") => StorageConfig::None,
            Some(other) => return Err(SettingsError::UnknownBackend(other.to_string())),
        };

        // an explicitly empty LOG_FILE_PATH turns the file layer off
        let file_path = match lookup(util::LOG_FILE_PATH) {
            None => Some(PathBuf::from(util::DEFAULT_LOG_FILE_PATH)),
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(PathBuf::from(raw.trim())),
        };
        let log = LogSettings {
            file_path,
            backup_days: parse_or(&lookup, util::LOG_BACKUP_DAYS, util::DEFAULT_LOG_BACKUP_DAYS)?,
            level: non_empty(&lookup, util::LOG_LEVEL)
                .unwrap_or_else(|| util::DEFAULT_LOG_LEVEL.to_string()),
        };

        let settings = Settings {
            telegram_bot_token,
            telegram_api_base,
            seed_chat_id,
            defaults,
            check_interval,
            request_timeout,
            updates_poll,
            poll_interval,
            metric,
            storage,
            log,
        };
        trace!("loaded settings: {settings:?}");
        Ok(settings)
    }
}

fn positive_seconds<F>(lookup: &F, name: &'static str, default: u64) -> Result<Duration, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, name, default)? {
        0 => Err(SettingsError::Zero { name }),
        seconds => Ok(Duration::from_secs(seconds)),
    }
}
