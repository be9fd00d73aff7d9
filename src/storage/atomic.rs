//! Crash-safe file replacement

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::trace;

use super::error::{StorageError, StorageResult};

/// Path of the staging file used for `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Serialize `value` as JSON and replace `path` atomically.
///
/// The payload is written and synced to `<path>.tmp` in the same directory,
/// then renamed over `path`, so readers see either the old or the new file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    if path.as_os_str().is_empty() {
        return Err(StorageError::InvalidPath {
            path: path.to_path_buf(),
            reason: "destination path cannot be empty".to_string(),
        });
    }
    if path.is_dir() {
        return Err(StorageError::InvalidPath {
            path: path.to_path_buf(),
            reason: "destination is a directory".to_string(),
        });
    }

    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let payload = serde_json::to_vec(value)?;
    let temp_path = temp_path_for(path);

    let mut file = File::create(&temp_path).map_err(|e| StorageError::io(&temp_path, e))?;
    file.write_all(&payload)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| StorageError::io(path, e))?;

    trace!("wrote {} bytes to {}", payload.len(), path.display());
    Ok(())
}
