//! Application-wide constants
//!
//! This module contains all state paths, storage keys, event names and
//! validation bounds used throughout the crate, providing a single source of
//! truth for constant values.

/// Storage file location
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "ffv-state";

    /// Key-value storage file name
    pub const STORAGE_FILENAME: &str = "storage.json";

    /// Environment variable holding the log level
    pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
}

/// Dot-separated paths into the state tree
pub mod paths {
    pub const APP_INITIALIZED: &str = "app.initialized";
    pub const APP_IS_OPENING_FILE: &str = "app.isOpeningFile";
    pub const APP_START_TIME: &str = "app.startTime";

    pub const GLOBAL_DATA: &str = "data.globalData";
    pub const DATA_IS_LOADED: &str = "data.isLoaded";

    pub const FIT_FILE: &str = "fitFile";
    pub const FIT_IS_LOADING: &str = "fitFile.isLoading";
    pub const FIT_LOADING_PROGRESS: &str = "fitFile.loadingProgress";
    pub const FIT_CURRENT_FILE: &str = "fitFile.currentFile";
    pub const FIT_LOADING_ERROR: &str = "fitFile.loadingError";
    pub const FIT_RAW_DATA: &str = "fitFile.rawData";
    pub const FIT_PROCESSED_DATA: &str = "fitFile.processedData";
    pub const FIT_VALIDATION: &str = "fitFile.validation";

    pub const UI_ACTIVE_TAB: &str = "ui.activeTab";
    pub const UI_THEME: &str = "ui.theme";
    pub const UI_FULLSCREEN: &str = "ui.isFullscreen";
    pub const UI_SIDEBAR_COLLAPSED: &str = "ui.sidebarCollapsed";
    pub const UI_CHART_CONTROLS_VISIBLE: &str = "ui.chartControlsVisible";
    pub const UI_PERFORMANCE_MONITORING: &str = "ui.performanceMonitoringEnabled";
    pub const UI_LOADING_INDICATOR: &str = "ui.loadingIndicator";
    pub const UI_WINDOW_STATE: &str = "ui.windowState";

    pub const MAP_MARKER_COUNT: &str = "map.markerCount";

    pub const OVERLAY_FILES: &str = "overlays.loadedFitFiles";
    pub const OVERLAY_HIGHLIGHTED: &str = "overlays.highlightedOverlayIdx";

    pub const ZONES_HEART_RATE: &str = "zones.heartRate";
    pub const ZONES_POWER: &str = "zones.power";

    pub const SETTINGS: &str = "settings";
    pub const SETTINGS_LAST_MODIFIED: &str = "settings.lastModified";
    pub const SETTINGS_INITIALIZED: &str = "settings.initialized";
}

/// Domain event names emitted alongside the generic `<path>-changed` events
pub mod events {
    /// Suffix appended to a path to form its change event name
    pub const CHANGED_SUFFIX: &str = "-changed";

    /// Emitted once per `update()` batch
    pub const BATCH_UPDATE: &str = "state:batch-update";

    pub const APP_INITIALIZED: &str = "app:initialized";

    pub const DATA_LOADED: &str = "data:loaded";
    pub const DATA_CLEARED: &str = "data:cleared";
    pub const DATA_CHANGED: &str = "data:changed";

    pub const FILE_LOADING_STARTED: &str = "file:loading-started";
    pub const FILE_LOADING_PROGRESS: &str = "file:loading-progress";
    pub const FILE_LOADED: &str = "file:loaded";
    pub const FILE_LOADING_ERROR: &str = "file:loading-error";
    pub const FILE_CLEARED: &str = "file:cleared";

    pub const THEME_CHANGED: &str = "ui:theme-changed";
    pub const TAB_CHANGED: &str = "ui:tab-changed";

    pub const OVERLAYS_CHANGED: &str = "overlays:changed";
    pub const OVERLAY_HIGHLIGHT_CHANGED: &str = "overlays:highlight-changed";

    pub const HEART_RATE_ZONES_CHANGED: &str = "zones:heart-rate-changed";
    pub const POWER_ZONES_CHANGED: &str = "zones:power-changed";

    pub const SETTINGS_CHANGED: &str = "settings:changed";
    pub const CHART_SETTINGS_CHANGED: &str = "settings:chart-changed";
    pub const SETTINGS_RESET: &str = "settings:reset";
    pub const SETTINGS_SYNCED: &str = "settings:synced";
}

/// Key-value storage keys and prefixes
pub mod storage {
    pub const THEME_KEY: &str = "ffv-theme";
    pub const MAP_THEME_INVERTED_KEY: &str = "ffv-map-theme-inverted";

    pub const CHART_PREFIX: &str = "chartjs_";
    pub const EXPORT_PREFIX: &str = "export_";
    pub const UI_PREFIX: &str = "ui_";
    pub const UNITS_PREFIX: &str = "units_";
    pub const POWER_ESTIMATION_PREFIX: &str = "powerEst_";

    /// Stored migration marker
    pub const MIGRATION_VERSION_KEY: &str = "settings_migration_version";

    /// Current migration version written after a successful run
    pub const CURRENT_MIGRATION_VERSION: &str = "2";

    /// Prefix for per-path persisted snapshots (`ffv_state_<path>`)
    pub const PATH_SNAPSHOT_PREFIX: &str = "ffv_state_";

    /// State paths mirrored to `ffv_state_<path>` records
    pub const PERSISTED_PATHS: &[&str] = &[
        super::paths::UI_THEME,
        super::paths::UI_ACTIVE_TAB,
        super::paths::UI_CHART_CONTROLS_VISIBLE,
        super::paths::UI_PERFORMANCE_MONITORING,
    ];

    /// Version string stamped on settings export envelopes
    pub const EXPORT_FORMAT_VERSION: &str = "1.0";
}

/// Names of the globals reflected by the legacy bridge
pub mod legacy {
    pub const GLOBAL_DATA: &str = "globalData";
    pub const LOADED_FIT_FILES: &str = "loadedFitFiles";
    pub const MAP_MARKER_COUNT: &str = "mapMarkerCount";
    pub const HIGHLIGHTED_OVERLAY_IDX: &str = "_highlightedOverlayIdx";
    pub const HEART_RATE_ZONES: &str = "heartRateZones";
    pub const POWER_ZONES: &str = "powerZones";

    /// Name of the alias scope hanging off the global scope
    pub const WINDOW_ALIAS: &str = "window";
}

/// Default values for the initial state tree
pub mod defaults {
    pub const ACTIVE_TAB: &str = "summary";
    pub const THEME: &str = "dark";
    pub const MAP_MARKER_COUNT: u64 = 50;
    pub const WINDOW_WIDTH: u32 = 1200;
    pub const WINDOW_HEIGHT: u32 = 800;
}

/// Validation bounds
pub mod validation {
    pub const MIN_PROGRESS: f64 = 0.0;
    pub const MAX_PROGRESS: f64 = 100.0;

    /// Tabs the viewer knows how to render
    pub const KNOWN_TABS: &[&str] = &["summary", "map", "chart", "data", "zwift", "altfit"];

    pub const THEMES: &[&str] = &["dark", "light", "auto"];
}
