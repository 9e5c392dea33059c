//! Declarative description of every persisted setting category
//!
//! Scalar categories live in one storage record under a bare key. Object
//! categories are denormalized: each field is its own record under
//! `<prefix><field>`, so a single field can be read or written without
//! touching the rest of the category.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::constants::storage::{
    CHART_PREFIX, EXPORT_PREFIX, MAP_THEME_INVERTED_KEY, POWER_ESTIMATION_PREFIX, THEME_KEY,
    UI_PREFIX, UNITS_PREFIX,
};
use crate::constants::validation::THEMES;

use super::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingCategory {
    Theme,
    MapTheme,
    Chart,
    Ui,
    Export,
    Units,
    PowerEstimation,
}

impl SettingCategory {
    pub const ALL: [SettingCategory; 7] = [
        SettingCategory::Theme,
        SettingCategory::MapTheme,
        SettingCategory::Chart,
        SettingCategory::Ui,
        SettingCategory::Export,
        SettingCategory::Units,
        SettingCategory::PowerEstimation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingCategory::Theme => "theme",
            SettingCategory::MapTheme => "mapTheme",
            SettingCategory::Chart => "chart",
            SettingCategory::Ui => "ui",
            SettingCategory::Export => "export",
            SettingCategory::Units => "units",
            SettingCategory::PowerEstimation => "powerEstimation",
        }
    }

    /// State path mirroring this category (`settings.<name>`)
    pub fn state_path(self) -> String {
        format!("settings.{}", self.name())
    }

    pub fn schema(self) -> &'static SchemaEntry {
        // ALL and SCHEMA share ordering
        &SCHEMA[self as usize]
    }
}

impl fmt::Display for SettingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SettingCategory {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingCategory::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| SettingsError::UnknownCategory(s.to_string()))
    }
}

/// Where a category lives in key-value storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBinding {
    Key(&'static str),
    Prefix(&'static str),
}

impl StorageBinding {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBinding::Key(k) | StorageBinding::Prefix(k) => k,
        }
    }

    /// Whether a raw storage key belongs to this binding
    pub fn matches(self, key: &str) -> bool {
        match self {
            StorageBinding::Key(k) => key == k,
            StorageBinding::Prefix(p) => key.starts_with(p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Number,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar(ScalarKind),
    Object,
}

pub struct SchemaEntry {
    pub category: SettingCategory,
    pub storage: StorageBinding,
    pub kind: ValueKind,
    default: fn() -> Value,
    validate: fn(&Value) -> bool,
    validate_field: fn(&str, &Value) -> bool,
}

impl fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("category", &self.category)
            .field("storage", &self.storage)
            .field("kind", &self.kind)
            .finish()
    }
}

impl SchemaEntry {
    pub fn default_value(&self) -> Value {
        (self.default)()
    }

    /// Default for one field of an object category
    pub fn default_field(&self, key: &str) -> Option<Value> {
        match (self.default)() {
            Value::Object(mut map) => map.remove(key),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        self.kind == ValueKind::Object
    }

    /// Validate a whole-category value. Object categories also check every
    /// field.
    pub fn validate(&self, value: &Value) -> bool {
        if !(self.validate)(value) {
            return false;
        }
        match value {
            Value::Object(map) if self.is_object() => {
                map.iter().all(|(k, v)| (self.validate_field)(k, v))
            }
            _ => true,
        }
    }

    pub fn validate_field(&self, key: &str, value: &Value) -> bool {
        self.is_object() && !key.is_empty() && (self.validate_field)(key, value)
    }

    pub fn record_key(&self, field: &str) -> String {
        format!("{}{field}", self.storage.as_str())
    }

    /// Decode a stored record. Scalars are coerced by kind; object fields are
    /// JSON with a raw-string fallback for records written unquoted.
    pub fn decode(&self, raw: &str) -> Option<Value> {
        match self.kind {
            ValueKind::Scalar(ScalarKind::Bool) => Some(Value::Bool(raw == "true")),
            ValueKind::Scalar(ScalarKind::Number) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|n| json!(n)),
            ValueKind::Scalar(ScalarKind::String) => Some(Value::String(raw.to_string())),
            ValueKind::Object => {
                Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
            }
        }
    }

    /// Encode for storage: strings are stored raw, everything else as JSON
    pub fn encode(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn is_bool(v: &Value) -> bool {
    v.is_boolean()
}

fn is_object(v: &Value) -> bool {
    v.is_object()
}

fn any_field(_: &str, _: &Value) -> bool {
    true
}

fn is_color(v: &Value) -> bool {
    v.as_str().is_some_and(|s| {
        s.len() > 1 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
    })
}

fn default_theme() -> Value {
    json!("dark")
}

fn valid_theme(v: &Value) -> bool {
    v.as_str().is_some_and(|t| THEMES.contains(&t))
}

fn default_map_theme() -> Value {
    Value::Bool(true)
}

fn default_chart() -> Value {
    json!({
        "chartType": "line",
        "interpolation": "linear",
        "animation": "normal",
        "exportTheme": "auto",
        "showGrid": true,
        "showLegend": true,
        "showTitle": true,
        "showPoints": false,
        "showFill": false,
        "smoothing": 0.1,
        "maxpoints": "all",
    })
}

fn valid_chart_field(key: &str, v: &Value) -> bool {
    if key.ends_with("_color") || key.starts_with("color_") {
        return is_color(v);
    }
    if key.starts_with("field_") {
        return matches!(v.as_str(), Some("visible" | "hidden"));
    }
    !v.is_null()
}

fn default_ui() -> Value {
    json!({
        "sidebarCollapsed": false,
        "chartControlsVisible": true,
        "performanceMonitoringEnabled": false,
    })
}

fn default_export() -> Value {
    json!({
        "format": "csv",
        "includeHeaders": true,
        "precision": 2,
    })
}

fn valid_export_field(key: &str, v: &Value) -> bool {
    match key {
        "format" => matches!(v.as_str(), Some("csv" | "gpx" | "json" | "zip")),
        "includeHeaders" => v.is_boolean(),
        "precision" => v.as_u64().is_some_and(|p| p <= 10),
        _ => !v.is_null(),
    }
}

fn default_units() -> Value {
    json!({
        "distance": "kilometers",
        "elevation": "meters",
        "temperature": "celsius",
        "time": "hours",
    })
}

fn valid_units_field(key: &str, v: &Value) -> bool {
    let Some(unit) = v.as_str() else {
        return false;
    };
    let allowed: &[&str] = match key {
        "distance" => &["kilometers", "miles", "meters", "feet"],
        "elevation" => &["meters", "feet"],
        "temperature" => &["celsius", "fahrenheit"],
        "time" => &["hours", "minutes", "seconds"],
        _ => return true,
    };
    allowed.contains(&unit)
}

fn default_power_estimation() -> Value {
    json!({
        "enabled": false,
        "riderWeightKg": 75,
        "bikeWeightKg": 10,
        "crr": 0.004,
        "cda": 0.32,
        "drivetrainEfficiency": 0.97,
        "windSpeedMps": 0,
    })
}

fn valid_power_field(key: &str, v: &Value) -> bool {
    match key {
        "enabled" => v.is_boolean(),
        "windSpeedMps" => v.is_number(),
        "drivetrainEfficiency" => v.as_f64().is_some_and(|e| e > 0.0 && e <= 1.0),
        _ => v.as_f64().is_some_and(|n| n > 0.0),
    }
}

/// One entry per category, in [`SettingCategory::ALL`] order
pub static SCHEMA: [SchemaEntry; 7] = [
    SchemaEntry {
        category: SettingCategory::Theme,
        storage: StorageBinding::Key(THEME_KEY),
        kind: ValueKind::Scalar(ScalarKind::String),
        default: default_theme,
        validate: valid_theme,
        validate_field: any_field,
    },
    SchemaEntry {
        category: SettingCategory::MapTheme,
        storage: StorageBinding::Key(MAP_THEME_INVERTED_KEY),
        kind: ValueKind::Scalar(ScalarKind::Bool),
        default: default_map_theme,
        validate: is_bool,
        validate_field: any_field,
    },
    SchemaEntry {
        category: SettingCategory::Chart,
        storage: StorageBinding::Prefix(CHART_PREFIX),
        kind: ValueKind::Object,
        default: default_chart,
        validate: is_object,
        validate_field: valid_chart_field,
    },
    SchemaEntry {
        category: SettingCategory::Ui,
        storage: StorageBinding::Prefix(UI_PREFIX),
        kind: ValueKind::Object,
        default: default_ui,
        validate: is_object,
        validate_field: any_field,
    },
    SchemaEntry {
        category: SettingCategory::Export,
        storage: StorageBinding::Prefix(EXPORT_PREFIX),
        kind: ValueKind::Object,
        default: default_export,
        validate: is_object,
        validate_field: valid_export_field,
    },
    SchemaEntry {
        category: SettingCategory::Units,
        storage: StorageBinding::Prefix(UNITS_PREFIX),
        kind: ValueKind::Object,
        default: default_units,
        validate: is_object,
        validate_field: valid_units_field,
    },
    SchemaEntry {
        category: SettingCategory::PowerEstimation,
        storage: StorageBinding::Prefix(POWER_ESTIMATION_PREFIX),
        kind: ValueKind::Object,
        default: default_power_estimation,
        validate: is_object,
        validate_field: valid_power_field,
    },
];

/// Category owning a raw storage key, if any
pub fn category_for_key(key: &str) -> Option<SettingCategory> {
    SCHEMA.iter().find(|e| e.storage.matches(key)).map(|e| e.category)
}
