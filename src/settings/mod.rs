//! Persisted user settings
//!
//! This module provides schema-driven settings on top of key-value storage:
//! - **schema**: categories, storage bindings, defaults and validators
//! - **migration**: legacy key renames behind a version marker
//!
//! [`SettingsState`] mirrors every category into the path store under
//! `settings.<category>` so other modules can subscribe to it like any other
//! state. Storage failures never propagate past the non-`try_` entry points;
//! they are logged and the schema default stands in.

pub mod migration;
pub mod schema;

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{events, paths, storage::EXPORT_FORMAT_VERSION};
use crate::state::{PathStore, SetMeta, StateEvent, Subscription, now_millis};
use crate::storage::{KeyValueStore, StorageChange, StorageError};

pub use migration::{MigrationOutcome, run_migrations};
pub use schema::{SettingCategory, SchemaEntry, StorageBinding, ValueKind, category_for_key};

/// Source tag on store writes made while syncing from storage
pub const SETTINGS_SOURCE: &str = "settings";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown settings category '{0}'")]
    UnknownCategory(String),

    #[error("invalid value for {category}{}", field_suffix(.key))]
    Validation {
        category: SettingCategory,
        key: Option<String>,
    },

    #[error("category '{0}' has no sub-keys")]
    NotAnObject(SettingCategory),

    #[error("malformed settings payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn field_suffix(key: &Option<String>) -> String {
    key.as_ref().map(|k| format!(".{k}")).unwrap_or_default()
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOptions {
    /// Skip the `settings:reset` event
    pub silent: bool,
}

/// Versioned envelope produced by [`SettingsState::export_settings`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsExport {
    pub settings: Map<String, Value>,
    pub version: String,
    pub timestamp: i64,
}

pub struct SettingsState {
    store: Rc<PathStore>,
    storage: Rc<dyn KeyValueStore>,
}

impl SettingsState {
    /// In-memory defaults for every category, used to seed the state tree
    pub fn default_slice() -> Value {
        let mut slice = Map::new();
        for category in SettingCategory::ALL {
            slice.insert(category.name().to_string(), category.schema().default_value());
        }
        slice.insert("initialized".to_string(), Value::Bool(false));
        slice.insert("lastModified".to_string(), Value::Null);
        Value::Object(slice)
    }

    pub fn new(store: Rc<PathStore>, storage: Rc<dyn KeyValueStore>) -> Self {
        Self { store, storage }
    }

    pub fn storage(&self) -> &Rc<dyn KeyValueStore> {
        &self.storage
    }

    /// Migrate legacy keys, load every category and mark settings ready
    pub fn initialize(&self) -> bool {
        if let Err(e) = run_migrations(self.storage.as_ref()) {
            warn!(error = %e, "Settings migration failed; continuing with current keys");
        }
        let synced = self.sync_from_storage();
        self.store.set(
            paths::SETTINGS_INITIALIZED,
            Value::Bool(true),
            SetMeta::from_source(SETTINGS_SOURCE),
        );
        info!(backend = self.storage.name(), categories = synced, "Settings initialized");
        synced == SettingCategory::ALL.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Read a category, or one field of an object category. Never fails:
    /// storage errors fall back to the schema default.
    pub fn get_setting(&self, category: SettingCategory, key: Option<&str>) -> Value {
        match self.try_get_setting(category, key) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    category = %category,
                    key = ?key,
                    error = %e,
                    "Settings read failed, using default"
                );
                let schema = category.schema();
                match key {
                    Some(k) => schema.default_field(k).unwrap_or(Value::Null),
                    None => schema.default_value(),
                }
            }
        }
    }

    pub fn try_get_setting(
        &self,
        category: SettingCategory,
        key: Option<&str>,
    ) -> SettingsResult<Value> {
        let schema = category.schema();
        match (schema.storage, key) {
            // Hot path: exactly one record lookup
            (StorageBinding::Prefix(_), Some(key)) => {
                let stored = self
                    .storage
                    .get_item(&schema.record_key(key))?
                    .and_then(|raw| schema.decode(&raw));
                Ok(stored
                    .or_else(|| schema.default_field(key))
                    .unwrap_or(Value::Null))
            }
            (StorageBinding::Prefix(prefix), None) => {
                let mut merged = match schema.default_value() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                for record in self.storage.keys_with_prefix(prefix)? {
                    let field = &record[prefix.len()..];
                    if field.is_empty() {
                        continue;
                    }
                    let stored = self.storage.get_item(&record)?;
                    if let Some(value) = stored.and_then(|raw| schema.decode(&raw)) {
                        merged.insert(field.to_string(), value);
                    }
                }
                Ok(Value::Object(merged))
            }
            (StorageBinding::Key(_), Some(_)) => Err(SettingsError::NotAnObject(category)),
            (StorageBinding::Key(storage_key), None) => Ok(self
                .storage
                .get_item(storage_key)?
                .and_then(|raw| schema.decode(&raw))
                .unwrap_or_else(|| schema.default_value())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_setting(&self, category: SettingCategory, value: Value, key: Option<&str>) -> bool {
        match self.try_set_setting(category, value, key) {
            Ok(()) => true,
            Err(e) => {
                warn!(category = %category, key = ?key, error = %e, "Settings write rejected");
                false
            }
        }
    }

    /// Validate and persist. A keyed write touches one record and one state
    /// path; it never enumerates storage.
    pub fn try_set_setting(
        &self,
        category: SettingCategory,
        value: Value,
        key: Option<&str>,
    ) -> SettingsResult<()> {
        let schema = category.schema();
        match key {
            Some(key) => {
                if !schema.is_object() {
                    return Err(SettingsError::NotAnObject(category));
                }
                if !schema.validate_field(key, &value) {
                    return Err(SettingsError::Validation {
                        category,
                        key: Some(key.to_string()),
                    });
                }
                self.storage
                    .set_item(&schema.record_key(key), &SchemaEntry::encode(&value))?;
                self.store.set_child(
                    &category.state_path(),
                    key,
                    value.clone(),
                    SetMeta::from_source(SETTINGS_SOURCE),
                );
            }
            None => {
                if !schema.validate(&value) {
                    return Err(SettingsError::Validation { category, key: None });
                }
                match (&value, schema.storage) {
                    (Value::Object(fields), StorageBinding::Prefix(_)) => {
                        for (field, field_value) in fields {
                            let record = schema.record_key(field);
                            self.storage.set_item(&record, &SchemaEntry::encode(field_value))?;
                        }
                        self.store.merge(
                            &category.state_path(),
                            value.clone(),
                            SetMeta::from_source(SETTINGS_SOURCE),
                        );
                    }
                    (_, StorageBinding::Key(storage_key)) => {
                        self.storage.set_item(storage_key, &SchemaEntry::encode(&value))?;
                        self.store.set(
                            &category.state_path(),
                            value.clone(),
                            SetMeta::from_source(SETTINGS_SOURCE),
                        );
                    }
                    // validate() only accepts objects for prefix categories
                    (_, StorageBinding::Prefix(_)) => {
                        return Err(SettingsError::Validation { category, key: None });
                    }
                }
            }
        }

        self.touch();
        let payload = json!({ "category": category.name(), "key": key, "value": value });
        self.store.emit(events::SETTINGS_CHANGED, payload.clone());
        if category == SettingCategory::Chart {
            self.store.emit(events::CHART_SETTINGS_CHANGED, payload);
        }
        Ok(())
    }

    /// Delete stored records and restore schema defaults. `None` resets every
    /// category. Returns false if any category could not be cleared.
    pub fn reset_settings(&self, category: Option<SettingCategory>, options: ResetOptions) -> bool {
        let targets: Vec<SettingCategory> = match category {
            Some(c) => vec![c],
            None => SettingCategory::ALL.to_vec(),
        };

        let mut ok = true;
        for category in &targets {
            if let Err(e) = self.clear_category(*category) {
                warn!(category = %category, error = %e, "Failed to reset settings category");
                ok = false;
                continue;
            }
            self.store.set(
                &category.state_path(),
                category.schema().default_value(),
                SetMeta::from_source(SETTINGS_SOURCE),
            );
        }
        self.touch();

        if !options.silent {
            let names: Vec<&str> = targets.iter().map(|c| c.name()).collect();
            self.store.emit(events::SETTINGS_RESET, json!({ "categories": names }));
        }
        info!(categories = targets.len(), ok = ok, "Settings reset");
        ok
    }

    fn clear_category(&self, category: SettingCategory) -> SettingsResult<()> {
        match category.schema().storage {
            StorageBinding::Key(key) => self.storage.remove_item(key)?,
            StorageBinding::Prefix(prefix) => {
                for record in self.storage.keys_with_prefix(prefix)? {
                    self.storage.remove_item(&record)?;
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Export / import
    // ─────────────────────────────────────────────────────────────────────

    pub fn export_settings(&self) -> SettingsExport {
        let settings = SettingCategory::ALL
            .into_iter()
            .map(|c| (c.name().to_string(), self.get_setting(c, None)))
            .collect();
        SettingsExport {
            settings,
            version: EXPORT_FORMAT_VERSION.to_string(),
            timestamp: now_millis(),
        }
    }

    /// Apply an exported envelope. Unknown categories are skipped; the result
    /// is true only if every recognized category was written.
    pub fn import_settings(&self, payload: &Value) -> bool {
        let Some(settings) = payload.get("settings").and_then(Value::as_object) else {
            warn!("Settings import payload has no 'settings' object");
            return false;
        };
        if let Some(version) = payload.get("version").and_then(Value::as_str)
            && version != EXPORT_FORMAT_VERSION
        {
            debug!(version = %version, "Importing settings from a different export version");
        }

        let mut ok = true;
        for (name, value) in settings {
            let category = match name.parse::<SettingCategory>() {
                Ok(category) => category,
                Err(_) => {
                    debug!(category = %name, "Ignoring unknown settings category");
                    continue;
                }
            };
            if let Err(e) = self.try_set_setting(category, value.clone(), None) {
                warn!(category = %category, error = %e, "Settings import rejected category");
                ok = false;
            }
        }
        info!(ok = ok, "Settings imported");
        ok
    }

    pub fn subscribe_to_chart_settings(
        &self,
        callback: impl Fn(&StateEvent) + 'static,
    ) -> Subscription {
        self.store.subscribe(events::CHART_SETTINGS_CHANGED, callback)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cross-window sync
    // ─────────────────────────────────────────────────────────────────────

    /// React to a write made by another window. Returns true if it touched a
    /// settings key and triggered a resync.
    pub fn handle_storage_change(&self, change: &StorageChange) -> bool {
        let relevant = match &change.key {
            None => true,
            Some(key) => category_for_key(key).is_some(),
        };
        if !relevant {
            return false;
        }
        debug!(key = ?change.key, "External settings change, resyncing");
        self.sync_from_storage();
        true
    }

    /// Re-read every category into the store. Returns how many loaded cleanly.
    pub fn sync_from_storage(&self) -> usize {
        let mut synced = 0;
        for category in SettingCategory::ALL {
            match self.try_get_setting(category, None) {
                Ok(value) => {
                    self.store
                        .set(&category.state_path(), value, SetMeta::from_source(SETTINGS_SOURCE));
                    synced += 1;
                }
                Err(e) => {
                    warn!(category = %category, error = %e, "Failed to sync settings category")
                }
            }
        }
        self.store.emit(events::SETTINGS_SYNCED, json!({ "categories": synced }));
        synced
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.store
            .with(paths::SETTINGS_LAST_MODIFIED, |v| v.and_then(Value::as_i64))
    }

    fn touch(&self) {
        self.store.set(
            paths::SETTINGS_LAST_MODIFIED,
            json!(now_millis()),
            SetMeta::from_source(SETTINGS_SOURCE),
        );
    }
}
