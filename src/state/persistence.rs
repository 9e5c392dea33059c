//! Persisted path snapshots
//!
//! A fixed allow-list of UI paths is mirrored into key-value storage under
//! `ffv_state_<path>` whenever it changes, and written back into the store at
//! start-up. Everything else in the tree is session-only.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::events::StateEvent;
use super::store::{PathStore, SetMeta, Subscription};
use crate::constants::storage::{PATH_SNAPSHOT_PREFIX, PERSISTED_PATHS};
use crate::storage::{KeyValueStore, StorageResult};

/// Source tag carried by restore writes so they are not written straight back
pub const PERSISTENCE_SOURCE: &str = "persistence";

pub struct PathPersistence {
    store: Rc<PathStore>,
    storage: Rc<dyn KeyValueStore>,
    paths: Vec<String>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl PathPersistence {
    pub fn new(store: Rc<PathStore>, storage: Rc<dyn KeyValueStore>, paths: &[&str]) -> Self {
        Self {
            store,
            storage,
            paths: paths.iter().map(|p| p.to_string()).collect(),
            subscriptions: RefCell::new(Vec::new()),
        }
    }

    /// Persistence over the built-in UI allow-list
    pub fn with_default_paths(store: Rc<PathStore>, storage: Rc<dyn KeyValueStore>) -> Self {
        Self::new(store, storage, PERSISTED_PATHS)
    }

    /// Storage key for a persisted path
    pub fn snapshot_key(path: &str) -> String {
        format!("{PATH_SNAPSHOT_PREFIX}{path}")
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Load every stored snapshot into the store; returns how many were applied.
    /// Unreadable records are skipped.
    pub fn restore(&self) -> usize {
        let mut restored = 0;
        for path in &self.paths {
            let key = Self::snapshot_key(path);
            let raw = match self.storage.get_item(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read persisted state");
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    if self.store.set(path, value, SetMeta::from_source(PERSISTENCE_SOURCE)) {
                        restored += 1;
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding unreadable persisted state"),
            }
        }
        info!(restored = restored, total = self.paths.len(), "Restored persisted state paths");
        restored
    }

    /// Start mirroring changes of the allow-listed paths into storage
    pub fn attach(&self) {
        let mut subscriptions = self.subscriptions.borrow_mut();
        if !subscriptions.is_empty() {
            debug!("Path persistence already attached");
            return;
        }
        for path in &self.paths {
            let storage = self.storage.clone();
            let key = Self::snapshot_key(path);
            let sub = self.store.subscribe_path(path, move |event: &StateEvent| {
                let Some(change) = event.change() else {
                    return;
                };
                if change.source.as_deref() == Some(PERSISTENCE_SOURCE) {
                    return;
                }
                let value = change.new_value.clone().unwrap_or(Value::Null);
                if let Err(e) = write_snapshot(storage.as_ref(), &key, &value) {
                    warn!(key = %key, error = %e, "Failed to persist state path");
                }
            });
            subscriptions.push(sub);
        }
    }

    /// Stop mirroring
    pub fn detach(&self) {
        for sub in self.subscriptions.borrow_mut().drain(..) {
            sub.unsubscribe();
        }
    }

    /// Write the current value of `path` immediately
    pub fn save(&self, path: &str) -> StorageResult<()> {
        let value = self.store.get(path).unwrap_or(Value::Null);
        write_snapshot(self.storage.as_ref(), &Self::snapshot_key(path), &value)
    }

    /// Remove every stored snapshot
    pub fn clear(&self) -> StorageResult<()> {
        for path in &self.paths {
            self.storage.remove_item(&Self::snapshot_key(path))?;
        }
        Ok(())
    }
}

fn write_snapshot(storage: &dyn KeyValueStore, key: &str, value: &Value) -> StorageResult<()> {
    // serde_json::Value always serializes
    let encoded = value.to_string();
    storage.set_item(key, &encoded)
}
