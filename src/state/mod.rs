//! Path-addressed reactive state store
//!
//! This module provides the single source of truth for viewer state:
//! - **store**: [`PathStore`] dotted-path get/set/subscribe, batches and snapshots
//! - **events**: change/batch event payloads and the listener registry
//! - **path**: path parsing and tree traversal helpers
//! - **persistence**: allow-listed path snapshots written to key-value storage

pub mod events;
pub mod path;
pub mod persistence;
pub mod store;

use thiserror::Error;

pub use events::{BatchEvent, ChangeEvent, EventPayload, ListenerId, StateEvent};
pub use path::changed_event;
pub use persistence::PathPersistence;
pub use store::{PathStore, SetMeta, Subscription};

/// Errors raised by path store writes
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state path is empty")]
    EmptyPath,

    #[error("state path '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("cannot write '{path}': segment '{segment}' is not an object")]
    NotAContainer { path: String, segment: String },

    #[error("value for '{0}' rejected by validator")]
    Rejected(String),

    #[error("failed to decode value at '{path}'")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
