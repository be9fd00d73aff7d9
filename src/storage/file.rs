//! JSON file storage backend
//!
//! Two documents, each replaced atomically on every save:
//! - the subscriber file (see [`super::schema`])
//! - the global state file

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::GlobalState;

use super::atomic::write_json_atomic;
use super::backend::StateStore;
use super::error::StorageResult;
use super::schema::{SubscriberFile, SubscriberMap, decode_global_state, decode_subscribers};

pub struct JsonFileStore {
    subscribers_path: PathBuf,
    state_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(subscribers_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            subscribers_path: subscribers_path.into(),
            state_path: state_path.into(),
        }
    }

    pub fn subscribers_path(&self) -> &Path {
        &self.subscribers_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}

/// Read and parse a JSON document; `None` means "start empty".
fn read_json(path: &Path) -> Option<Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist yet, starting empty", path.display());
            return None;
        }
        Err(e) => {
            warn!("failed to read {}, starting empty: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} is corrupted, starting empty: {e}", path.display());
            None
        }
    }
}

impl StateStore for JsonFileStore {
    fn load_subscribers(&self) -> SubscriberMap {
        let Some(value) = read_json(&self.subscribers_path) else {
            return SubscriberMap::new();
        };

        let (subscribers, format) = decode_subscribers(value);
        if format.needs_upgrade() {
            info!(
                "read {} subscribers from {} in {format:?} format, will rewrite on next save",
                subscribers.len(),
                self.subscribers_path.display()
            );
        }
        subscribers
    }

    fn save_subscribers(&self, subscribers: &SubscriberMap) -> StorageResult<()> {
        write_json_atomic(&self.subscribers_path, &SubscriberFile::encode(subscribers))
    }

    fn load_global(&self) -> GlobalState {
        read_json(&self.state_path)
            .map(decode_global_state)
            .unwrap_or_default()
    }

    fn save_global(&self, state: &GlobalState) -> StorageResult<()> {
        write_json_atomic(&self.state_path, state)
    }

    fn describe(&self) -> String {
        format!(
            "json files (subscribers: {}, state: {})",
            self.subscribers_path.display(),
            self.state_path.display()
        )
    }
}
