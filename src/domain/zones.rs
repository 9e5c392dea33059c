//! Heart-rate and power zone distributions plus their display colors
//!
//! Zone colors are user settings stored as individual chart fields
//! (`hr_zone_<n>_color`, `power_zone_<n>_color`), resolved one key at a time.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::constants::{events, paths};
use crate::settings::{SettingCategory, SettingsState};
use crate::state::{PathStore, SetMeta};

const HEART_RATE_PALETTE: &[&str] = &["#808080", "#3b82f6", "#10b981", "#f59e0b", "#ef4444"];

const POWER_PALETTE: &[&str] = &[
    "#808080", "#3b82f6", "#10b981", "#84cc16", "#f59e0b", "#ef4444", "#a855f7",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    HeartRate,
    Power,
}

impl ZoneKind {
    pub fn path(self) -> &'static str {
        match self {
            ZoneKind::HeartRate => paths::ZONES_HEART_RATE,
            ZoneKind::Power => paths::ZONES_POWER,
        }
    }

    fn event(self) -> &'static str {
        match self {
            ZoneKind::HeartRate => events::HEART_RATE_ZONES_CHANGED,
            ZoneKind::Power => events::POWER_ZONES_CHANGED,
        }
    }

    fn palette(self) -> &'static [&'static str] {
        match self {
            ZoneKind::HeartRate => HEART_RATE_PALETTE,
            ZoneKind::Power => POWER_PALETTE,
        }
    }

    /// Chart settings field holding the color of zone `zone` (1-based)
    pub fn color_key(self, zone: u32) -> String {
        match self {
            ZoneKind::HeartRate => format!("hr_zone_{zone}_color"),
            ZoneKind::Power => format!("power_zone_{zone}_color"),
        }
    }

    pub fn default_color(self, zone: u32) -> &'static str {
        let palette = self.palette();
        let idx = (zone.max(1) as usize - 1) % palette.len();
        palette[idx]
    }
}

/// Time spent in one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// 1-based zone number
    pub zone: u32,
    /// seconds
    #[serde(default)]
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

pub struct ZoneState {
    store: Rc<PathStore>,
    settings: Rc<SettingsState>,
}

impl ZoneState {
    pub fn default_slice() -> Value {
        json!({ "heartRate": null, "power": null })
    }

    pub fn new(store: Rc<PathStore>, settings: Rc<SettingsState>) -> Self {
        for kind in [ZoneKind::HeartRate, ZoneKind::Power] {
            store.register_validator(kind.path(), |v| v.is_null() || v.is_array());
            let event = kind.event();
            store.register_derived_events(kind.path(), move |_| vec![event]);
        }
        Self { store, settings }
    }

    pub fn zones(&self, kind: ZoneKind) -> Vec<Zone> {
        match self.store.try_get_as::<Option<Vec<Zone>>>(kind.path()) {
            Ok(zones) => zones.flatten().unwrap_or_default(),
            Err(e) => {
                warn!(path = kind.path(), error = %e, "Zone data unreadable");
                Vec::new()
            }
        }
    }

    pub fn set_zones(&self, kind: ZoneKind, zones: &[Zone]) -> bool {
        self.store.set(kind.path(), json!(zones), SetMeta::default())
    }

    pub fn set_heart_rate_zones(&self, zones: &[Zone]) -> bool {
        self.set_zones(ZoneKind::HeartRate, zones)
    }

    pub fn set_power_zones(&self, zones: &[Zone]) -> bool {
        self.set_zones(ZoneKind::Power, zones)
    }

    pub fn clear_zones(&self) {
        for kind in [ZoneKind::HeartRate, ZoneKind::Power] {
            self.store.set(kind.path(), Value::Null, SetMeta::default());
        }
    }

    /// Configured color for a zone, falling back to the built-in palette
    pub fn zone_color(&self, kind: ZoneKind, zone: u32) -> String {
        let key = kind.color_key(zone);
        match self.settings.get_setting(SettingCategory::Chart, Some(key.as_str())) {
            Value::String(color) => color,
            _ => kind.default_color(zone).to_string(),
        }
    }

    pub fn set_zone_color(&self, kind: ZoneKind, zone: u32, color: &str) -> bool {
        self.settings
            .set_setting(SettingCategory::Chart, json!(color), Some(kind.color_key(zone).as_str()))
    }

    /// Zones with their resolved colors filled in
    pub fn zones_with_colors(&self, kind: ZoneKind) -> Vec<Zone> {
        self.zones(kind)
            .into_iter()
            .map(|mut zone| {
                zone.color = Some(self.zone_color(kind, zone.zone));
                zone
            })
            .collect()
    }
}
