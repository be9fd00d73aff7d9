//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Running without a writable data directory (`STORAGE_BACKEND=none`)
//! - Testing the registry and the event loop without touching disk
//!
//! Everything is lost on restart.

use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::GlobalState;

use super::backend::StateStore;
use super::error::{StorageError, StorageResult};
use super::schema::SubscriberMap;

#[derive(Debug, Default)]
struct Documents {
    subscribers: SubscriberMap,
    global: GlobalState,
    subscriber_saves: usize,
    global_saves: usize,
    fail_writes: bool,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<Documents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing documents, as if they had been read from disk
    pub fn with_state(subscribers: SubscriberMap, global: GlobalState) -> Self {
        Self {
            documents: Mutex::new(Documents {
                subscribers,
                global,
                ..Documents::default()
            }),
        }
    }

    /// Make every subsequent save fail (simulates a full or read-only disk)
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Number of successful subscriber saves
    pub fn subscriber_saves(&self) -> usize {
        self.lock().subscriber_saves
    }

    /// Number of successful global state saves
    pub fn global_saves(&self) -> usize {
        self.lock().global_saves
    }

    fn lock(&self) -> MutexGuard<'_, Documents> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn load_subscribers(&self) -> SubscriberMap {
        self.lock().subscribers.clone()
    }

    fn save_subscribers(&self, subscribers: &SubscriberMap) -> StorageResult<()> {
        let mut documents = self.lock();
        if documents.fail_writes {
            return Err(StorageError::Backend("in-memory store is read-only".to_string()));
        }
        documents.subscribers = subscribers.clone();
        documents.subscriber_saves += 1;
        trace!("in-memory backend: stored {} subscribers", subscribers.len());
        Ok(())
    }

    fn load_global(&self) -> GlobalState {
        self.lock().global.clone()
    }

    fn save_global(&self, state: &GlobalState) -> StorageResult<()> {
        let mut documents = self.lock();
        if documents.fail_writes {
            return Err(StorageError::Backend("in-memory store is read-only".to_string()));
        }
        documents.global = state.clone();
        documents.global_saves += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory (no persistence)".to_string()
    }
}
