#![forbid(unsafe_code)]

//! Reactive state layer for a FIT file viewer
//!
//! - **state**: the path-addressed store, its events and persisted snapshots
//! - **domain**: typed facades (application, data, file loading, UI, overlays, zones)
//! - **settings**: schema-driven settings over key-value storage
//! - **legacy**: bridge keeping bare globals in step with the store
//! - **storage**: key-value backends
//!
//! [`ViewerState`] wires all of it together.

pub mod constants;
pub mod domain;
pub mod legacy;
pub mod settings;
pub mod state;
pub mod storage;

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::{info, warn};

use domain::{
    ApplicationState, FitFileState, GlobalDataState, OverlayState, UIState, ZoneState, default_tree,
};
use legacy::{CommitFn, GlobalScope, LegacyBridge};
use settings::SettingsState;
use state::{PathPersistence, PathStore, SetMeta, StateEvent, Subscription};
use storage::{KeyValueStore, StorageChange};

/// The store plus every domain module, settings and persistence, built in
/// dependency order
pub struct ViewerState {
    store: Rc<PathStore>,
    pub app: ApplicationState,
    pub data: Rc<GlobalDataState>,
    pub fit_file: FitFileState,
    pub ui: UIState,
    pub overlays: OverlayState,
    pub zones: ZoneState,
    pub settings: Rc<SettingsState>,
    persistence: PathPersistence,
    bridge: Option<LegacyBridge>,
}

impl ViewerState {
    /// Build the default tree, migrate and load settings, restore persisted
    /// UI paths and start mirroring them
    pub fn new(storage: Rc<dyn KeyValueStore>) -> Self {
        let store = PathStore::with_tree(default_tree());

        let settings = Rc::new(SettingsState::new(store.clone(), storage.clone()));
        if !settings.initialize() {
            warn!("Some settings categories failed to load; defaults in effect");
        }

        let data = Rc::new(GlobalDataState::new(store.clone()));
        let viewer = Self {
            app: ApplicationState::new(store.clone()),
            fit_file: FitFileState::new(store.clone(), data.clone()),
            ui: UIState::new(store.clone()),
            overlays: OverlayState::new(store.clone()),
            zones: ZoneState::new(store.clone(), settings.clone()),
            persistence: PathPersistence::with_default_paths(store.clone(), storage),
            data,
            settings,
            store,
            bridge: None,
        };

        viewer.persistence.restore();
        viewer.persistence.attach();
        viewer.app.mark_initialized();
        info!("Viewer state ready");
        viewer
    }

    /// Start mirroring the bridged paths onto `global` and its `window` alias.
    /// Legacy `globalData` writes commit through [`GlobalDataState`].
    pub fn install_legacy_bridge(&mut self, global: Rc<GlobalScope>) -> &LegacyBridge {
        if let Some(previous) = self.bridge.take() {
            previous.uninstall();
        }
        let data = self.data.clone();
        let commit: CommitFn =
            Rc::new(move |value: Value, meta: SetMeta| data.set_global_data(value, meta));
        let commits = HashMap::from([(constants::legacy::GLOBAL_DATA, commit)]);
        let bridge = LegacyBridge::install_with(
            self.store.clone(),
            global,
            legacy::DEFAULT_BINDINGS,
            commits,
        );
        self.bridge.insert(bridge)
    }

    pub fn legacy_bridge(&self) -> Option<&LegacyBridge> {
        self.bridge.as_ref()
    }

    pub fn store(&self) -> &Rc<PathStore> {
        &self.store
    }

    pub fn persistence(&self) -> &PathPersistence {
        &self.persistence
    }

    pub fn get_state(&self, path: &str) -> Option<Value> {
        self.store.get(path)
    }

    pub fn set_state(&self, path: &str, value: Value, meta: SetMeta) -> bool {
        self.store.set(path, value, meta)
    }

    /// Shallow-merge `value` into the object at `path`
    pub fn update_state(&self, path: &str, value: Value, meta: SetMeta) -> bool {
        self.store.merge(path, value, meta)
    }

    /// Subscribe to an event by its exact name: a domain constant from
    /// [`constants::events`] or a `<path>-changed` name
    pub fn subscribe(&self, event: &str, callback: impl Fn(&StateEvent) + 'static) -> Subscription {
        self.store.subscribe(event, callback)
    }

    /// Subscribe to writes of exactly `path`
    pub fn subscribe_path(
        &self,
        path: &str,
        callback: impl Fn(&StateEvent) + 'static,
    ) -> Subscription {
        self.store.subscribe_path(path, callback)
    }

    /// Apply writes another window made to the shared storage: settings keys
    /// trigger a settings resync, persisted path keys a path restore.
    /// Returns how many changes were relevant.
    pub fn apply_storage_changes(&self, changes: &[StorageChange]) -> usize {
        let mut relevant = 0;
        let mut restore = false;
        for change in changes {
            let snapshot_key = change
                .key
                .as_deref()
                .is_some_and(|k| k.starts_with(constants::storage::PATH_SNAPSHOT_PREFIX));
            if snapshot_key {
                restore = true;
                relevant += 1;
            } else if self.settings.handle_storage_change(change) {
                relevant += 1;
            }
        }
        if restore {
            self.persistence.restore();
        }
        relevant
    }

    /// Deep copy of the whole tree
    pub fn snapshot(&self) -> Value {
        self.store.snapshot()
    }
}

impl Drop for ViewerState {
    fn drop(&mut self) {
        self.persistence.detach();
        if let Some(bridge) = self.bridge.take() {
            bridge.uninstall();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{events, paths};
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::cell::Cell;

    fn viewer() -> (Rc<MemoryStorage>, ViewerState) {
        let storage = Rc::new(MemoryStorage::new());
        let viewer = ViewerState::new(storage.clone());
        (storage, viewer)
    }

    #[test]
    fn test_round_trip_through_facade() {
        let (_storage, viewer) = viewer();
        let value = json!({"nested": [1, 2, {"deep": true}]});
        assert!(viewer.set_state("custom.slot", value.clone(), SetMeta::default()));
        assert_eq!(viewer.get_state("custom.slot"), Some(value));
        assert_eq!(viewer.get_state("custom.missing.leaf"), None);
    }

    #[test]
    fn test_update_state_merges() {
        let (_storage, viewer) = viewer();
        let resized = json!({"width": 1600});
        assert!(viewer.update_state(paths::UI_WINDOW_STATE, resized, SetMeta::default()));
        assert_eq!(viewer.ui.window_state().width, 1600);
        assert_eq!(viewer.ui.window_state().height, 800);
    }

    #[test]
    fn test_subscribe_by_path_and_by_event() {
        let (_storage, viewer) = viewer();
        let hits = Rc::new(Cell::new(0));
        let (a, b, c) = (hits.clone(), hits.clone(), hits.clone());
        let _path = viewer.subscribe_path(paths::UI_THEME, move |_| a.set(a.get() + 1));
        let _event = viewer.subscribe(events::THEME_CHANGED, move |_| b.set(b.get() + 1));
        let _named = viewer.subscribe("ui.theme-changed", move |_| c.set(c.get() + 1));
        viewer.ui.set_theme("light");
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn test_subscribe_path_handles_colons_in_paths() {
        let (_storage, viewer) = viewer();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let _sub = viewer.subscribe_path("custom.a:b", move |_| h.set(h.get() + 1));
        viewer.set_state("custom.a:b", json!(1), SetMeta::default());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_new_initializes_everything() {
        let (_storage, viewer) = viewer();
        assert!(viewer.app.is_initialized());
        assert_eq!(viewer.get_state(paths::SETTINGS_INITIALIZED), Some(json!(true)));
        assert_eq!(viewer.ui.theme(), "dark");
    }

    #[test]
    fn test_persisted_ui_paths_survive_restart() {
        let storage = Rc::new(MemoryStorage::new());
        {
            let viewer = ViewerState::new(storage.clone());
            viewer.ui.set_active_tab("map");
            viewer.ui.set_chart_controls_visible(false);
            viewer.ui.toggle_fullscreen();
        }
        let viewer = ViewerState::new(storage);
        assert_eq!(viewer.ui.active_tab(), "map");
        assert!(!viewer.ui.chart_controls_visible());
        assert!(!viewer.ui.is_fullscreen());
    }

    #[test]
    fn test_file_load_reaches_legacy_globals() {
        let (_storage, mut viewer) = viewer();
        let global = GlobalScope::new("global");
        viewer.install_legacy_bridge(global.clone());

        viewer.fit_file.start_file_loading("ride.fit");
        viewer.fit_file.handle_file_loaded(json!({"recordMesgs": [{"heart_rate": 100}]}));

        assert_eq!(
            global.get("globalData"),
            Some(json!({"recordMesgs": [{"heart_rate": 100}]}))
        );
        global.set("mapMarkerCount", json!(120)).unwrap();
        assert_eq!(viewer.ui.map_marker_count(), 120);
    }

    #[test]
    fn test_legacy_global_data_write_keeps_domain_in_step() {
        let (_storage, mut viewer) = viewer();
        let global = GlobalScope::new("global");
        viewer.install_legacy_bridge(global.clone());
        let loaded = Rc::new(Cell::new(0));
        let l = loaded.clone();
        let _sub = viewer.subscribe(events::DATA_LOADED, move |_| l.set(l.get() + 1));

        global.set("globalData", json!({"recordMesgs": [1]})).unwrap();
        assert!(viewer.data.is_loaded());
        assert_eq!(viewer.data.global_data(), Some(json!({"recordMesgs": [1]})));
        assert_eq!(loaded.get(), 1);

        global.window().unwrap().set("globalData", Value::Null).unwrap();
        assert!(!viewer.data.is_loaded());
        assert_eq!(global.get("globalData"), Some(Value::Null));
    }

    #[test]
    fn test_external_storage_changes_resync() {
        let (storage, viewer) = viewer();
        storage.set_item("ffv-theme", "light").unwrap();
        storage.set_item("ffv_state_ui.activeTab", "\"chart\"").unwrap();
        let changes = vec![
            StorageChange {
                key: Some("ffv-theme".into()),
                old_value: None,
                new_value: Some("light".into()),
            },
            StorageChange {
                key: Some("ffv_state_ui.activeTab".into()),
                old_value: None,
                new_value: Some("\"chart\"".into()),
            },
            StorageChange {
                key: Some("someone-elses-key".into()),
                old_value: None,
                new_value: None,
            },
        ];
        assert_eq!(viewer.apply_storage_changes(&changes), 2);
        assert_eq!(viewer.get_state("settings.theme"), Some(json!("light")));
        assert_eq!(viewer.ui.active_tab(), "chart");
    }

    #[test]
    fn test_zone_colors_follow_settings() {
        let (_storage, viewer) = viewer();
        viewer.zones.set_zone_color(domain::ZoneKind::Power, 1, "#000000");
        assert_eq!(viewer.zones.zone_color(domain::ZoneKind::Power, 1), "#000000");
        assert_eq!(viewer.get_state("settings.chart.power_zone_1_color"), Some(json!("#000000")));
    }
}
