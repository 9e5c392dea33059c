//! The file-loading state machine
//!
//! `idle -> loading -> {loaded | error}`. A new [`FitFileState::start_file_loading`]
//! supersedes whatever was in flight; there is no cancel. [`FitFileState::clear_file_state`]
//! returns to `idle` from anywhere.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::analysis::{self, DataQuality, ProcessedData};
use super::global_data::GlobalDataState;
use crate::constants::{events, paths, validation};
use crate::state::{PathStore, SetMeta};

/// Typed view of the `fitFile` slice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLoadingState {
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub loading_progress: f64,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub loading_error: Option<String>,
    #[serde(default)]
    pub raw_data: Option<Value>,
    #[serde(default)]
    pub processed_data: Option<ProcessedData>,
    #[serde(default)]
    pub validation: Option<DataQuality>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLoadPhase {
    Idle,
    Loading,
    Loaded,
    Error,
}

impl FileLoadingState {
    pub fn phase(&self) -> FileLoadPhase {
        if self.is_loading {
            FileLoadPhase::Loading
        } else if self.loading_error.is_some() {
            FileLoadPhase::Error
        } else if self.raw_data.as_ref().is_some_and(|v| !v.is_null()) {
            FileLoadPhase::Loaded
        } else {
            FileLoadPhase::Idle
        }
    }
}

fn idle_indicator() -> Value {
    json!({ "active": false, "progress": 0.0, "message": null })
}

pub struct FitFileState {
    store: Rc<PathStore>,
    data: Rc<GlobalDataState>,
}

impl FitFileState {
    pub fn default_slice() -> Value {
        json!(FileLoadingState::default())
    }

    pub fn new(store: Rc<PathStore>, data: Rc<GlobalDataState>) -> Self {
        store.register_validator(paths::FIT_LOADING_PROGRESS, |v| {
            v.as_f64()
                .is_some_and(|p| (validation::MIN_PROGRESS..=validation::MAX_PROGRESS).contains(&p))
        });
        Self { store, data }
    }

    pub fn loading_state(&self) -> FileLoadingState {
        match self.store.try_get_as(paths::FIT_FILE) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "File loading state unreadable");
                FileLoadingState::default()
            }
        }
    }

    pub fn phase(&self) -> FileLoadPhase {
        self.loading_state().phase()
    }

    pub fn is_loading(&self) -> bool {
        self.store
            .with(paths::FIT_IS_LOADING, |v| v.and_then(Value::as_bool).unwrap_or(false))
    }

    pub fn current_file(&self) -> Option<String> {
        self.store
            .with(paths::FIT_CURRENT_FILE, |v| v.and_then(Value::as_str).map(str::to_string))
    }

    pub fn validation(&self) -> Option<DataQuality> {
        self.store.get_as(paths::FIT_VALIDATION)
    }

    /// Enter `loading` for `file`, resetting progress and any prior error
    pub fn start_file_loading(&self, file: &str) -> bool {
        if let Some(previous) = self.current_file().filter(|_| self.is_loading()) {
            debug!(previous = %previous, next = %file, "Superseding in-flight file load");
        }
        let ok = self.apply(&[
            (paths::FIT_IS_LOADING, Value::Bool(true)),
            (paths::FIT_LOADING_PROGRESS, json!(0.0)),
            (paths::FIT_CURRENT_FILE, json!(file)),
            (paths::FIT_LOADING_ERROR, Value::Null),
            (paths::APP_IS_OPENING_FILE, Value::Bool(true)),
            (
                paths::UI_LOADING_INDICATOR,
                json!({ "active": true, "progress": 0.0, "message": format!("Loading {file}") }),
            ),
        ]);
        self.store.emit(events::FILE_LOADING_STARTED, json!({ "file": file }));
        info!(file = %file, "File loading started");
        ok
    }

    /// Update the 0-100 gauge. Ignored unless a load is in flight.
    pub fn update_loading_progress(&self, progress: f64) -> bool {
        if !self.is_loading() {
            debug!(progress = progress, "Progress outside of a load ignored");
            return false;
        }
        if progress.is_nan() {
            return false;
        }
        let progress = progress.clamp(validation::MIN_PROGRESS, validation::MAX_PROGRESS);
        let ok = self.apply(&[
            (paths::FIT_LOADING_PROGRESS, json!(progress)),
            ("ui.loadingIndicator.progress", json!(progress)),
        ]);
        self.store
            .emit(events::FILE_LOADING_PROGRESS, json!({ "progress": progress }));
        ok
    }

    /// Terminal success: store the payload and its derived data, publish it
    /// as the global data and announce the load
    pub fn handle_file_loaded(&self, payload: Value) -> DataQuality {
        let quality = analysis::data_quality(analysis::records(&payload));
        let processed = analysis::process(&payload);

        self.apply(&[
            (paths::FIT_IS_LOADING, Value::Bool(false)),
            (paths::FIT_LOADING_PROGRESS, json!(validation::MAX_PROGRESS)),
            (paths::FIT_LOADING_ERROR, Value::Null),
            (paths::FIT_RAW_DATA, payload.clone()),
            (paths::FIT_PROCESSED_DATA, json!(processed)),
            (paths::FIT_VALIDATION, json!(quality)),
            (paths::APP_IS_OPENING_FILE, Value::Bool(false)),
            (paths::UI_LOADING_INDICATOR, idle_indicator()),
        ]);
        self.data.set_global_data(payload, SetMeta::default());

        let file = self.current_file();
        self.store.emit(
            events::FILE_LOADED,
            json!({ "file": file, "quality": quality, "summary": processed.summary }),
        );
        info!(
            file = file.as_deref().unwrap_or("<unnamed>"),
            records = quality.total_records,
            completeness = quality.completeness,
            "File loaded"
        );
        quality
    }

    /// Terminal failure
    pub fn handle_file_loading_error(&self, message: &str) -> bool {
        let ok = self.apply(&[
            (paths::FIT_IS_LOADING, Value::Bool(false)),
            (paths::FIT_LOADING_ERROR, json!(message)),
            (paths::APP_IS_OPENING_FILE, Value::Bool(false)),
            (paths::UI_LOADING_INDICATOR, idle_indicator()),
        ]);
        let file = self.current_file();
        self.store
            .emit(events::FILE_LOADING_ERROR, json!({ "file": file, "error": message }));
        warn!(
            file = file.as_deref().unwrap_or("<unnamed>"),
            error = %message,
            "File loading failed"
        );
        ok
    }

    /// Back to `idle` from any state, dropping the global data
    pub fn clear_file_state(&self) -> bool {
        let ok = self.store.set(paths::FIT_FILE, Self::default_slice(), SetMeta::default());
        self.data.clear_global_data();
        self.store.emit(events::FILE_CLEARED, Value::Null);
        debug!("File state cleared");
        ok
    }

    fn apply(&self, writes: &[(&str, Value)]) -> bool {
        let batch: BTreeMap<String, Value> = writes
            .iter()
            .map(|(path, value)| (path.to_string(), value.clone()))
            .collect();
        self.store.update(batch, SetMeta::default())
    }
}
