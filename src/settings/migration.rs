//! One-shot renames of storage keys written by older releases
//!
//! A single marker record gates the run. Each rename moves a legacy key to
//! its namespaced replacement only when the replacement is not already set,
//! so running the routine again (with or without the marker) changes nothing.

use tracing::{debug, info};

use crate::constants::storage::{
    CURRENT_MIGRATION_VERSION, MAP_THEME_INVERTED_KEY, MIGRATION_VERSION_KEY, THEME_KEY,
};
use crate::storage::{KeyValueStore, StorageResult};

/// `(legacy key, current key)`
pub const LEGACY_RENAMES: &[(&str, &str)] = &[
    ("theme", THEME_KEY),
    ("mapThemeInverted", MAP_THEME_INVERTED_KEY),
    ("chartjs_maxPoints", "chartjs_maxpoints"),
    ("exportFormat", "export_format"),
    ("distanceUnits", "units_distance"),
    ("temperatureUnits", "units_temperature"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Marker already at the current version
    UpToDate,
    Migrated { from: Option<String>, renamed: usize },
}

pub fn stored_version(storage: &dyn KeyValueStore) -> StorageResult<Option<String>> {
    storage.get_item(MIGRATION_VERSION_KEY)
}

/// Run pending migrations and stamp the marker
pub fn run_migrations(storage: &dyn KeyValueStore) -> StorageResult<MigrationOutcome> {
    let from = stored_version(storage)?;
    if from.as_deref() == Some(CURRENT_MIGRATION_VERSION) {
        debug!(version = CURRENT_MIGRATION_VERSION, "Settings storage up to date");
        return Ok(MigrationOutcome::UpToDate);
    }

    let mut renamed = 0;
    for (old, new) in LEGACY_RENAMES {
        let Some(value) = storage.get_item(old)? else {
            continue;
        };
        if storage.get_item(new)?.is_none() {
            storage.set_item(new, &value)?;
            renamed += 1;
        }
        storage.remove_item(old)?;
    }

    storage.set_item(MIGRATION_VERSION_KEY, CURRENT_MIGRATION_VERSION)?;
    info!(
        from = from.as_deref().unwrap_or("none"),
        to = CURRENT_MIGRATION_VERSION,
        renamed = renamed,
        "Migrated settings storage"
    );
    Ok(MigrationOutcome::Migrated { from, renamed })
}
