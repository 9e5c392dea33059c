//! Application lifecycle flags

use std::rc::Rc;

use serde_json::{Value, json};
use tracing::info;

use crate::constants::{events, paths};
use crate::state::{PathStore, SetMeta, now_millis};

pub struct ApplicationState {
    store: Rc<PathStore>,
}

impl ApplicationState {
    pub fn default_slice() -> Value {
        json!({
            "initialized": false,
            "isOpeningFile": false,
            "startTime": now_millis(),
        })
    }

    pub fn new(store: Rc<PathStore>) -> Self {
        Self { store }
    }

    pub fn is_initialized(&self) -> bool {
        self.flag(paths::APP_INITIALIZED)
    }

    pub fn is_opening_file(&self) -> bool {
        self.flag(paths::APP_IS_OPENING_FILE)
    }

    /// Milliseconds since the tree was built
    pub fn uptime_ms(&self) -> i64 {
        let started = self
            .store
            .with(paths::APP_START_TIME, |v| v.and_then(Value::as_i64))
            .unwrap_or_else(now_millis);
        now_millis().saturating_sub(started)
    }

    /// Mark the application ready. Emits `app:initialized` once; later calls
    /// return false.
    pub fn mark_initialized(&self) -> bool {
        if self.is_initialized() {
            return false;
        }
        self.store.set(paths::APP_INITIALIZED, Value::Bool(true), SetMeta::default());
        self.store.emit(events::APP_INITIALIZED, json!({ "timestamp": now_millis() }));
        info!(uptime_ms = self.uptime_ms(), "Application initialized");
        true
    }

    pub fn set_file_opening_state(&self, opening: bool) -> bool {
        self.store.set(paths::APP_IS_OPENING_FILE, Value::Bool(opening), SetMeta::default())
    }

    fn flag(&self, path: &str) -> bool {
        self.store.with(path, |v| v.and_then(Value::as_bool).unwrap_or(false))
    }
}
