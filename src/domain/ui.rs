//! Tabs, theme, window chrome and the map marker budget

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::constants::{defaults, events, paths, validation};
use crate::state::{ChangeEvent, PathStore, SetMeta};

/// Last known main window geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    #[serde(default = "default_window_width")]
    pub width: u32,
    #[serde(default = "default_window_height")]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(default)]
    pub maximized: bool,
}

fn default_window_width() -> u32 {
    defaults::WINDOW_WIDTH
}

fn default_window_height() -> u32 {
    defaults::WINDOW_HEIGHT
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            width: defaults::WINDOW_WIDTH,
            height: defaults::WINDOW_HEIGHT,
            x: None,
            y: None,
            maximized: false,
        }
    }
}

/// Global progress overlay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingIndicator {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Fires when the written value differs from the previous one
fn on_difference(name: &'static str) -> impl Fn(&ChangeEvent) -> Vec<&'static str> {
    move |change: &ChangeEvent| {
        if change.old_value != change.new_value {
            vec![name]
        } else {
            Vec::new()
        }
    }
}

pub struct UIState {
    store: Rc<PathStore>,
}

impl UIState {
    pub fn default_slice() -> Value {
        json!({
            "activeTab": defaults::ACTIVE_TAB,
            "theme": defaults::THEME,
            "isFullscreen": false,
            "sidebarCollapsed": false,
            "chartControlsVisible": true,
            "performanceMonitoringEnabled": false,
            "loadingIndicator": LoadingIndicator::default(),
            "windowState": WindowState::default(),
        })
    }

    pub fn default_map_slice() -> Value {
        json!({ "markerCount": defaults::MAP_MARKER_COUNT })
    }

    pub fn new(store: Rc<PathStore>) -> Self {
        store.register_validator(paths::UI_THEME, |v| {
            v.as_str().is_some_and(|t| validation::THEMES.contains(&t))
        });
        store.register_validator(paths::UI_ACTIVE_TAB, |v| {
            v.as_str().is_some_and(|t| !t.is_empty())
        });
        store.register_validator(paths::MAP_MARKER_COUNT, |v| v.is_u64());
        store.register_derived_events(paths::UI_THEME, on_difference(events::THEME_CHANGED));
        store.register_derived_events(paths::UI_ACTIVE_TAB, on_difference(events::TAB_CHANGED));
        Self { store }
    }

    pub fn active_tab(&self) -> String {
        self.string_or(paths::UI_ACTIVE_TAB, defaults::ACTIVE_TAB)
    }

    pub fn set_active_tab(&self, tab: &str) -> bool {
        if !validation::KNOWN_TABS.contains(&tab) {
            debug!(tab = %tab, "Switching to a tab the viewer does not ship");
        }
        self.store.set(paths::UI_ACTIVE_TAB, json!(tab), SetMeta::default())
    }

    pub fn theme(&self) -> String {
        self.string_or(paths::UI_THEME, defaults::THEME)
    }

    pub fn set_theme(&self, theme: &str) -> bool {
        self.store.set(paths::UI_THEME, json!(theme), SetMeta::default())
    }

    pub fn is_fullscreen(&self) -> bool {
        self.flag(paths::UI_FULLSCREEN)
    }

    /// Flip fullscreen and return the new state
    pub fn toggle_fullscreen(&self) -> bool {
        let next = !self.is_fullscreen();
        self.store.set(paths::UI_FULLSCREEN, Value::Bool(next), SetMeta::default());
        next
    }

    pub fn set_sidebar_collapsed(&self, collapsed: bool) -> bool {
        self.store.set(paths::UI_SIDEBAR_COLLAPSED, Value::Bool(collapsed), SetMeta::default())
    }

    pub fn chart_controls_visible(&self) -> bool {
        self.store
            .with(paths::UI_CHART_CONTROLS_VISIBLE, |v| v.and_then(Value::as_bool))
            .unwrap_or(true)
    }

    pub fn set_chart_controls_visible(&self, visible: bool) -> bool {
        self.store.set(paths::UI_CHART_CONTROLS_VISIBLE, Value::Bool(visible), SetMeta::default())
    }

    pub fn set_performance_monitoring(&self, enabled: bool) -> bool {
        self.store.set(paths::UI_PERFORMANCE_MONITORING, Value::Bool(enabled), SetMeta::default())
    }

    pub fn loading_indicator(&self) -> LoadingIndicator {
        self.store.get_as(paths::UI_LOADING_INDICATOR).unwrap_or_default()
    }

    pub fn show_loading(&self, progress: f64, message: Option<&str>) -> bool {
        let indicator = LoadingIndicator {
            active: true,
            progress: progress.clamp(validation::MIN_PROGRESS, validation::MAX_PROGRESS),
            message: message.map(str::to_string),
        };
        self.store.set(paths::UI_LOADING_INDICATOR, json!(indicator), SetMeta::default())
    }

    pub fn hide_loading(&self) -> bool {
        self.store.set(
            paths::UI_LOADING_INDICATOR,
            json!(LoadingIndicator::default()),
            SetMeta::default(),
        )
    }

    pub fn window_state(&self) -> WindowState {
        match self.store.try_get_as(paths::UI_WINDOW_STATE) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Window state unreadable, using defaults");
                WindowState::default()
            }
        }
    }

    /// Merge new geometry over the stored one
    pub fn set_window_state(&self, state: &WindowState) -> bool {
        self.store.merge(paths::UI_WINDOW_STATE, json!(state), SetMeta::default())
    }

    pub fn map_marker_count(&self) -> u64 {
        self.store
            .with(paths::MAP_MARKER_COUNT, |v| v.and_then(Value::as_u64))
            .unwrap_or(defaults::MAP_MARKER_COUNT)
    }

    pub fn set_map_marker_count(&self, count: u64) -> bool {
        self.store.set(paths::MAP_MARKER_COUNT, json!(count), SetMeta::default())
    }

    fn flag(&self, path: &str) -> bool {
        self.store.with(path, |v| v.and_then(Value::as_bool).unwrap_or(false))
    }

    fn string_or(&self, path: &str, fallback: &str) -> String {
        self.store
            .with(path, |v| v.and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateEvent, Subscription};
    use std::cell::RefCell;

    fn ui() -> (Rc<PathStore>, UIState) {
        let store = PathStore::with_tree(json!({
            "ui": UIState::default_slice(),
            "map": UIState::default_map_slice(),
        }));
        let ui = UIState::new(store.clone());
        (store, ui)
    }

    type Changes = Rc<RefCell<Vec<(Value, Value)>>>;

    fn changes(store: &Rc<PathStore>, event: &str) -> (Changes, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = store.subscribe(event, move |e: &StateEvent| {
            if let Some(change) = e.change() {
                sink.borrow_mut().push((
                    change.old_value.clone().unwrap_or(Value::Null),
                    change.new_value.clone().unwrap_or(Value::Null),
                ));
            }
        });
        (seen, sub)
    }

    #[test]
    fn test_theme_change_event_contract() {
        let (store, ui) = ui();
        ui.set_theme("light");
        let (path_events, _a) = changes(&store, "ui.theme-changed");
        let (theme_events, _b) = changes(&store, events::THEME_CHANGED);

        ui.set_theme("dark");

        let expected = vec![(json!("light"), json!("dark"))];
        assert_eq!(*path_events.borrow(), expected);
        assert_eq!(*theme_events.borrow(), expected);
    }

    #[test]
    fn test_rewriting_same_theme_skips_domain_event() {
        let (store, ui) = ui();
        let (theme_events, _sub) = changes(&store, events::THEME_CHANGED);
        ui.set_theme("dark");
        assert!(theme_events.borrow().is_empty());
    }

    #[test]
    fn test_invalid_theme_rejected() {
        let (_store, ui) = ui();
        assert!(!ui.set_theme("neon"));
        assert_eq!(ui.theme(), "dark");
    }

    #[test]
    fn test_tab_switch() {
        let (store, ui) = ui();
        let (tab_events, _sub) = changes(&store, events::TAB_CHANGED);
        assert!(ui.set_active_tab("map"));
        assert!(!ui.set_active_tab(""));
        assert_eq!(ui.active_tab(), "map");
        assert_eq!(tab_events.borrow().len(), 1);
    }

    #[test]
    fn test_loading_indicator_clamps_progress() {
        let (_store, ui) = ui();
        ui.show_loading(140.0, Some("Parsing"));
        let indicator = ui.loading_indicator();
        assert!(indicator.active);
        assert_eq!(indicator.progress, 100.0);
        assert_eq!(indicator.message.as_deref(), Some("Parsing"));
        ui.hide_loading();
        assert_eq!(ui.loading_indicator(), LoadingIndicator::default());
    }

    #[test]
    fn test_window_state_merges() {
        let (_store, ui) = ui();
        assert_eq!(ui.window_state(), WindowState::default());
        let state = WindowState {
            width: 1600,
            x: Some(10),
            ..WindowState::default()
        };
        ui.set_window_state(&state);
        assert_eq!(ui.window_state(), state);
    }

    #[test]
    fn test_flags_and_marker_count() {
        let (store, ui) = ui();
        assert!(ui.toggle_fullscreen());
        assert!(ui.is_fullscreen());
        assert!(ui.chart_controls_visible());
        ui.set_chart_controls_visible(false);
        assert!(!ui.chart_controls_visible());
        assert_eq!(ui.map_marker_count(), 50);
        assert!(ui.set_map_marker_count(200));
        assert!(!store.set(paths::MAP_MARKER_COUNT, json!(-1), SetMeta::default()));
        assert_eq!(ui.map_marker_count(), 200);
    }
}
