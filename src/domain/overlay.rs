//! Additional FIT files drawn on top of the main one

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::constants::{events, paths};
use crate::state::{ChangeEvent, PathStore, SetMeta};

/// One loaded overlay. Fields the viewer does not know are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayFile {
    pub file_path: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OverlayFile {
    pub fn new(file_path: impl Into<String>, data: Value) -> Self {
        Self {
            file_path: file_path.into(),
            data,
            extra: Map::new(),
        }
    }
}

pub struct OverlayState {
    store: Rc<PathStore>,
}

impl OverlayState {
    pub fn default_slice() -> Value {
        json!({ "loadedFitFiles": [], "highlightedOverlayIdx": null })
    }

    pub fn new(store: Rc<PathStore>) -> Self {
        store.register_validator(paths::OVERLAY_FILES, Value::is_array);
        store.register_validator(paths::OVERLAY_HIGHLIGHTED, |v| v.is_null() || v.is_i64());
        store.register_derived_events(paths::OVERLAY_FILES, |_: &ChangeEvent| {
            vec![events::OVERLAYS_CHANGED]
        });
        store.register_derived_events(paths::OVERLAY_HIGHLIGHTED, |change: &ChangeEvent| {
            if change.old_value != change.new_value {
                vec![events::OVERLAY_HIGHLIGHT_CHANGED]
            } else {
                Vec::new()
            }
        });
        Self { store }
    }

    /// Loaded overlays; malformed entries are skipped
    pub fn loaded_files(&self) -> Vec<OverlayFile> {
        let raw = self.raw_files();
        raw.into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed overlay entry");
                    None
                }
            })
            .collect()
    }

    pub fn overlay_count(&self) -> usize {
        self.store
            .with(paths::OVERLAY_FILES, |v| v.and_then(Value::as_array).map_or(0, Vec::len))
    }

    /// Append an overlay unless one with the same path is loaded.
    /// Returns the overlay's index.
    pub fn add_overlay(&self, file: OverlayFile) -> Option<usize> {
        let mut files = self.raw_files();
        let path = file.file_path.as_str();
        let same_path = |f: &Value| f.get("filePath").and_then(Value::as_str) == Some(path);
        if let Some(existing) = files.iter().position(same_path) {
            debug!(path = %file.file_path, "Overlay already loaded");
            return Some(existing);
        }
        files.push(json!(file));
        let index = files.len() - 1;
        self.store
            .set(paths::OVERLAY_FILES, Value::Array(files), SetMeta::default())
            .then_some(index)
    }

    /// Remove the overlay at `index`, shifting the highlight to follow it
    pub fn remove_overlay(&self, index: usize) -> bool {
        let mut files = self.raw_files();
        if index >= files.len() {
            return false;
        }
        files.remove(index);

        let highlighted = match self.highlighted() {
            Some(h) if h == index => Value::Null,
            Some(h) if h > index => json!(h - 1),
            Some(h) => json!(h),
            None => Value::Null,
        };

        let mut batch = BTreeMap::new();
        batch.insert(paths::OVERLAY_FILES.to_string(), Value::Array(files));
        batch.insert(paths::OVERLAY_HIGHLIGHTED.to_string(), highlighted);
        self.store.update(batch, SetMeta::default())
    }

    pub fn highlighted(&self) -> Option<usize> {
        self.store.with(paths::OVERLAY_HIGHLIGHTED, |v| {
            v.and_then(Value::as_i64).and_then(|i| usize::try_from(i).ok())
        })
    }

    pub fn set_highlighted_overlay(&self, index: Option<usize>) -> bool {
        if let Some(i) = index
            && i >= self.overlay_count()
        {
            warn!(index = i, "Highlight index out of range");
            return false;
        }
        self.store.set(paths::OVERLAY_HIGHLIGHTED, json!(index), SetMeta::default())
    }

    pub fn clear_overlay_state(&self) -> bool {
        let mut batch = BTreeMap::new();
        batch.insert(paths::OVERLAY_FILES.to_string(), json!([]));
        batch.insert(paths::OVERLAY_HIGHLIGHTED.to_string(), Value::Null);
        self.store.update(batch, SetMeta::default())
    }

    fn raw_files(&self) -> Vec<Value> {
        self.store
            .with(paths::OVERLAY_FILES, |v| v.and_then(Value::as_array).cloned())
            .unwrap_or_default()
    }
}
