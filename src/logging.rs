//! tracing subscriber setup
//!
//! Compact stderr output always; a daily-rotated log file when configured.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogSettings;

const FALLBACK_DIR: &str = "data";
const DEFAULT_FILE_NAME: &str = "bot.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process.
pub fn init(settings: &LogSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let level = LevelFilter::from_str(&settings.level)
        .with_context(|| format!("invalid log level {:?}", settings.level))?;
    let filter = filter::Targets::new().with_targets(vec![
        ("dominance_watch", level),
        ("dominance_bot", level),
    ]);

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(false);

    let (file, guard) = match &settings.file_path {
        Some(path) => {
            let (directory, file_name) = resolve_log_location(path);
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(file_name)
                .max_log_files(settings.backup_days.saturating_add(1))
                .build(&directory)
                .with_context(|| format!("failed to open log file in {}", directory.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr.and_then(file))
        .with(filter)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}

/// Directory and file name for the log file.
///
/// Falls back to `./data/` when the configured directory cannot be created.
pub fn resolve_log_location(path: &Path) -> (PathBuf, String) {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    match fs::create_dir_all(&directory) {
        Ok(()) => (directory, file_name),
        Err(e) => {
            let fallback = PathBuf::from(".").join(FALLBACK_DIR);
            // runs before the subscriber exists
            eprintln!(
                "cannot create log directory {}: {e}; using {}",
                directory.display(),
                fallback.display()
            );
            if let Err(e) = fs::create_dir_all(&fallback) {
                eprintln!("cannot create fallback log directory {}: {e}", fallback.display());
            }
            (fallback, file_name)
        }
    }
}
