//! Storage backend trait definition
//!
//! This module defines the `StateStore` trait that every persistence
//! implementation provides for the event loop.

use crate::GlobalState;

use super::error::StorageResult;
use super::schema::SubscriberMap;

/// Durable home of the subscriber registry and the global state
///
/// ## Read Semantics
///
/// Loads never fail. A missing, unreadable or corrupted file is reported
/// with a log line and treated as an empty start state.
///
/// ## Write Semantics
///
/// Saves replace the whole document and must be atomic: after a crash the
/// store holds either the previous or the new document, never a mix.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the event loop is the only writer,
/// but the store is shared behind an `Arc`.
pub trait StateStore: Send + Sync {
    /// Load all subscribers, upgrading older file formats in memory
    fn load_subscribers(&self) -> SubscriberMap;

    /// Replace the persisted subscriber collection
    fn save_subscribers(&self, subscribers: &SubscriberMap) -> StorageResult<()>;

    /// Load the global state (empty if absent)
    fn load_global(&self) -> GlobalState;

    /// Replace the persisted global state
    fn save_global(&self, state: &GlobalState) -> StorageResult<()>;

    /// Short description for startup logging
    fn describe(&self) -> String;
}
