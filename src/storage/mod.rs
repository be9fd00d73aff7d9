//! Persistence for subscribers and global state
//!
//! ## Design
//!
//! - **Trait-based**: `StateStore` lets the event loop run against JSON files
//!   or memory
//! - **Whole-document writes**: every save replaces the document atomically
//!   (temp file + rename), so a crash never leaves a torn file
//! - **Tolerant reads**: missing or corrupted files mean "start empty"
//!
//! ## Backends
//!
//! - **JSON files** (default): `subscribers.json` and `state.json`
//! - **In-Memory**: no persistence, for tests or `STORAGE_BACKEND=none`

pub mod atomic;
pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod schema;

pub use backend::StateStore;
pub use error::{StorageError, StorageResult};
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use schema::{PersistedFormat, SubscriberMap};
