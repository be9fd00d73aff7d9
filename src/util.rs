use std::str::FromStr;

use crate::config::SettingsError;

pub const TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

pub const TELEGRAM_API_BASE: &str = "TELEGRAM_API_BASE";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

pub const UPPER_THRESHOLD_PERCENT: &str = "UPPER_THRESHOLD_PERCENT";
pub const DEFAULT_UPPER_THRESHOLD: f64 = 55.0;

pub const LOWER_THRESHOLD_PERCENT: &str = "LOWER_THRESHOLD_PERCENT";
pub const DEFAULT_LOWER_THRESHOLD: f64 = 45.0;

pub const CHECK_INTERVAL_SECONDS: &str = "CHECK_INTERVAL_SECONDS";
pub const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 300;

pub const REQUEST_TIMEOUT_SECONDS: &str = "REQUEST_TIMEOUT_SECONDS";
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 15;

pub const UPDATES_POLL_SECONDS: &str = "UPDATES_POLL_SECONDS";
pub const DEFAULT_UPDATES_POLL_SECONDS: u64 = 2;

/// Falls back to [`UPDATES_POLL_SECONDS`] when unset.
pub const POLL_INTERVAL_SECONDS: &str = "POLL_INTERVAL_SECONDS";

pub const METRIC_NAME: &str = "METRIC_NAME";
pub const DEFAULT_METRIC_NAME: &str = "BTC dominance";

pub const METRIC_SOURCE_URL: &str = "METRIC_SOURCE_URL";
pub const DEFAULT_METRIC_SOURCE_URL: &str = "https://api.coingecko.com/api/v3/global";

pub const METRIC_FETCH_ATTEMPTS: &str = "METRIC_FETCH_ATTEMPTS";
pub const DEFAULT_METRIC_FETCH_ATTEMPTS: u32 = 3;

pub const METRIC_FETCH_BACKOFF_MS: &str = "METRIC_FETCH_BACKOFF_MS";
pub const DEFAULT_METRIC_FETCH_BACKOFF_MS: u64 = 1500;

pub const STORAGE_BACKEND: &str = "STORAGE_BACKEND";

pub const STATE_FILE_PATH: &str = "STATE_FILE_PATH";
pub const DEFAULT_STATE_FILE_PATH: &str = "/app/data/state.json";

pub const SUBSCRIBERS_FILE_PATH: &str = "SUBSCRIBERS_FILE_PATH";
pub const DEFAULT_SUBSCRIBERS_FILE_PATH: &str = "/app/data/subscribers.json";

pub const LOG_FILE_PATH: &str = "LOG_FILE_PATH";
pub const DEFAULT_LOG_FILE_PATH: &str = "/app/data/bot.log";

pub const LOG_BACKUP_DAYS: &str = "LOG_BACKUP_DAYS";
pub const DEFAULT_LOG_BACKUP_DAYS: usize = 365;

pub const LOG_LEVEL: &str = "LOG_LEVEL";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Look up `name`, treating blank values as unset.
pub fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse `name` as `T`, or `None` when unset. Unparseable values are errors.
pub fn parse_optional<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = non_empty(lookup, name) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| SettingsError::Invalid {
            name,
            value: raw,
            expected: std::any::type_name::<T>(),
        })
}

pub fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    Ok(parse_optional(lookup, name)?.unwrap_or(default))
}
