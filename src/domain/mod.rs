//! Typed facades over slices of the state tree
//!
//! Each module owns one slice of the default tree, registers its validators
//! and derived events on the store, and exposes verbs and selectors so callers
//! never have to spell out paths.

pub mod analysis;
pub mod application;
pub mod fit_file;
pub mod global_data;
pub mod overlay;
pub mod ui;
pub mod zones;

use serde_json::{Value, json};

pub use analysis::{ActivitySummary, DataQuality, ProcessedData};
pub use application::ApplicationState;
pub use fit_file::{FileLoadPhase, FileLoadingState, FitFileState};
pub use global_data::GlobalDataState;
pub use overlay::{OverlayFile, OverlayState};
pub use ui::{LoadingIndicator, UIState, WindowState};
pub use zones::{Zone, ZoneKind, ZoneState};

use crate::settings::SettingsState;

/// Initial shape of the whole tree
pub fn default_tree() -> Value {
    json!({
        "app": ApplicationState::default_slice(),
        "data": GlobalDataState::default_slice(),
        "fitFile": FitFileState::default_slice(),
        "ui": UIState::default_slice(),
        "map": UIState::default_map_slice(),
        "overlays": OverlayState::default_slice(),
        "zones": ZoneState::default_slice(),
        "settings": SettingsState::default_slice(),
    })
}
