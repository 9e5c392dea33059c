//! Two-way bridge between legacy globals and path store state
//!
//! For every tracked name an accessor pair is installed on the global scope
//! and its `window` alias. Reads proxy to the store (falling back to the last
//! value the bridge saw), writes proxy to the owning domain's commit (or a
//! plain store `set`) marked non-reflecting.
//! Store writes made elsewhere are mirrored back onto any scope slot that is
//! still a plain data property.
//!
//! Re-entry is blocked per `name:scope` by [`ReentrancyGuard`]: while a write
//! for one slot is on the stack, a nested write to the same slot is dropped.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::scope::{GlobalScope, ScopeError};
use crate::constants::{legacy, paths};
use crate::state::{PathStore, SetMeta, StateEvent, Subscription};

/// One legacy global mapped to a store path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyBinding {
    pub name: &'static str,
    pub path: &'static str,
}

/// Domain commit used in place of a raw store write for one global; returns
/// whether the value was accepted
pub type CommitFn = Rc<dyn Fn(Value, SetMeta) -> bool>;

/// Globals bridged by default
pub const DEFAULT_BINDINGS: &[LegacyBinding] = &[
    LegacyBinding { name: legacy::GLOBAL_DATA, path: paths::GLOBAL_DATA },
    LegacyBinding { name: legacy::LOADED_FIT_FILES, path: paths::OVERLAY_FILES },
    LegacyBinding { name: legacy::MAP_MARKER_COUNT, path: paths::MAP_MARKER_COUNT },
    LegacyBinding { name: legacy::HIGHLIGHTED_OVERLAY_IDX, path: paths::OVERLAY_HIGHLIGHTED },
    LegacyBinding { name: legacy::HEART_RATE_ZONES, path: paths::ZONES_HEART_RATE },
    LegacyBinding { name: legacy::POWER_ZONES, path: paths::ZONES_POWER },
];

/// Scope-keyed set of writes currently on the stack
#[derive(Debug, Clone, Default)]
pub struct ReentrancyGuard {
    active: Rc<RefCell<HashSet<String>>>,
}

/// Held while a guarded write runs; releases its key on drop
#[derive(Debug)]
pub struct GuardToken {
    active: Rc<RefCell<HashSet<String>>>,
    key: String,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.active.borrow_mut().remove(&self.key);
    }
}

impl ReentrancyGuard {
    pub fn key(name: &str, scope: &str) -> String {
        format!("{name}:{scope}")
    }

    /// Claim `key`; `None` if it is already held further up the stack
    pub fn enter(&self, key: &str) -> Option<GuardToken> {
        if !self.active.borrow_mut().insert(key.to_string()) {
            return None;
        }
        Some(GuardToken {
            active: self.active.clone(),
            key: key.to_string(),
        })
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active.borrow().contains(key)
    }
}

struct BridgeInner {
    store: Rc<PathStore>,
    global: Rc<GlobalScope>,
    window: Rc<GlobalScope>,
    bindings: Vec<LegacyBinding>,
    commits: HashMap<&'static str, CommitFn>,
    last_known: RefCell<HashMap<&'static str, Value>>,
    guard: ReentrancyGuard,
    subscriptions: RefCell<Vec<Subscription>>,
}

/// Installed bridge; dropping it leaves the accessors in place but they stop
/// resolving once the store is gone. Call [`LegacyBridge::uninstall`] to
/// restore plain data properties.
pub struct LegacyBridge {
    inner: Rc<BridgeInner>,
}

impl LegacyBridge {
    /// Install the default bindings on `global` and its `window` alias
    pub fn install(store: Rc<PathStore>, global: Rc<GlobalScope>) -> Self {
        Self::install_with(store, global, DEFAULT_BINDINGS, HashMap::new())
    }

    /// Install `bindings`. A global listed in `commits` is written through its
    /// domain commit instead of a plain store `set`.
    pub fn install_with(
        store: Rc<PathStore>,
        global: Rc<GlobalScope>,
        bindings: &[LegacyBinding],
        commits: HashMap<&'static str, CommitFn>,
    ) -> Self {
        let window = global.ensure_window();
        let inner = Rc::new(BridgeInner {
            store,
            global,
            window,
            bindings: bindings.to_vec(),
            commits,
            last_known: RefCell::new(HashMap::new()),
            guard: ReentrancyGuard::default(),
            subscriptions: RefCell::new(Vec::new()),
        });

        let mut installed = 0;
        for binding in &inner.bindings {
            inner.hydrate(binding, true);
            for scope in inner.scopes() {
                match install_accessor(&inner, scope, *binding) {
                    Ok(()) => installed += 1,
                    Err(e) => warn!(
                        name = binding.name,
                        scope = scope.label(),
                        error = %e,
                        "Failed to install legacy accessor; global stays stale"
                    ),
                }
            }

            let weak = Rc::downgrade(&inner);
            let binding_copy = *binding;
            let sub = inner.store.subscribe_path(binding.path, move |event: &StateEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_store_change(binding_copy, event);
                }
            });
            inner.subscriptions.borrow_mut().push(sub);
        }

        info!(
            bindings = inner.bindings.len(),
            accessors = installed,
            "Legacy global bridge installed"
        );
        Self { inner }
    }

    pub fn bindings(&self) -> &[LegacyBinding] {
        &self.inner.bindings
    }

    /// Last value the bridge observed for `name`
    pub fn last_known(&self, name: &str) -> Option<Value> {
        self.inner.last_known.borrow().get(name).cloned()
    }

    pub fn guard(&self) -> &ReentrancyGuard {
        &self.inner.guard
    }

    /// Mirror the current store value of `name` onto plain data slots.
    /// Returns how many scopes were written.
    pub fn reflect(&self, name: &str) -> usize {
        let Some(binding) = self.inner.binding(name) else {
            debug!(name = %name, "Reflect requested for unbridged global");
            return 0;
        };
        let value = self.inner.store.get(binding.path).unwrap_or(Value::Null);
        self.inner.reflect_value(binding, &value)
    }

    /// Replace the accessors with plain data properties holding the current
    /// values and stop listening to the store
    pub fn uninstall(&self) {
        for sub in self.inner.subscriptions.borrow_mut().drain(..) {
            sub.unsubscribe();
        }
        for binding in &self.inner.bindings {
            let value = self.inner.read(binding).unwrap_or(Value::Null);
            for scope in self.inner.scopes() {
                if scope.has_custom_setter(binding.name) {
                    scope.define_data(binding.name, value.clone());
                }
            }
        }
        info!("Legacy global bridge uninstalled");
    }
}

fn install_accessor(
    inner: &Rc<BridgeInner>,
    scope: &Rc<GlobalScope>,
    binding: LegacyBinding,
) -> Result<(), ScopeError> {
    let reader = Rc::downgrade(inner);
    let writer = Rc::downgrade(inner);
    let label = scope.label().to_string();
    scope.define_accessor(
        binding.name,
        Rc::new(move || reader.upgrade().and_then(|inner| inner.read(&binding))),
        Some(Rc::new(move |value: Value| {
            if let Some(inner) = Weak::upgrade(&writer) {
                inner.write(&binding, &label, value);
            }
        })),
    )
}

impl BridgeInner {
    fn scopes(&self) -> [&Rc<GlobalScope>; 2] {
        [&self.global, &self.window]
    }

    fn binding(&self, name: &str) -> Option<LegacyBinding> {
        self.bindings.iter().find(|b| b.name == name).copied()
    }

    /// Getter body: adopt stray plain values, then read through to the store
    fn read(self: &Rc<Self>, binding: &LegacyBinding) -> Option<Value> {
        self.hydrate(binding, false);
        self.store
            .get(binding.path)
            .or_else(|| self.last_known.borrow().get(binding.name).cloned())
    }

    /// Setter body: one guarded, non-reflecting commit. Rejected values are
    /// dropped and never become the last known value.
    fn write(&self, binding: &LegacyBinding, scope: &str, value: Value) {
        let key = ReentrancyGuard::key(binding.name, scope);
        let Some(_token) = self.guard.enter(&key) else {
            debug!(key = %key, "Dropped re-entrant legacy write");
            return;
        };
        let meta = SetMeta::from_source(format!("legacy:{}", binding.name)).without_reflection();
        let accepted = match self.commits.get(binding.name) {
            Some(commit) => commit(value.clone(), meta),
            None => self.store.set(binding.path, value.clone(), meta),
        };
        if accepted {
            self.last_known.borrow_mut().insert(binding.name, value);
        } else {
            debug!(name = binding.name, scope = %scope, "Legacy write rejected; prior value kept");
        }
    }

    /// Adopt a non-null plain data value assigned to either scope before (or
    /// around) the accessor, then convert the slot back into an accessor.
    /// Frozen slots are only adopted at install time; afterwards they are
    /// known stale.
    fn hydrate(self: &Rc<Self>, binding: &LegacyBinding, at_install: bool) {
        for scope in self.scopes() {
            let Some(value) = scope.data_value(binding.name) else {
                continue;
            };
            if value.is_null() || (!at_install && !scope.is_configurable(binding.name)) {
                continue;
            }
            let key = ReentrancyGuard::key(binding.name, scope.label());
            if self.guard.is_active(&key) {
                continue;
            }
            // Slot already mirrors the store (reflected data property)
            if self.store.with(binding.path, |current| current == Some(&value)) {
                continue;
            }
            debug!(
                name = binding.name,
                scope = scope.label(),
                "Hydrating store from legacy global"
            );
            self.write(binding, scope.label(), value);
            if scope.is_configurable(binding.name)
                && let Err(e) = install_accessor(self, scope, *binding)
            {
                warn!(
                    name = binding.name,
                    scope = scope.label(),
                    error = %e,
                    "Failed to convert legacy global to accessor"
                );
            }
        }
    }

    fn on_store_change(&self, binding: LegacyBinding, event: &StateEvent) {
        let Some(change) = event.change() else {
            return;
        };
        let value = change.new_value.clone().unwrap_or(Value::Null);
        self.last_known
            .borrow_mut()
            .insert(binding.name, value.clone());
        if change.reflect {
            self.reflect_value(binding, &value);
        }
    }

    fn reflect_value(&self, binding: LegacyBinding, value: &Value) -> usize {
        let mut written = 0;
        for scope in self.scopes() {
            // An accessor already proxies to the store; writing it would recurse
            if scope.has_custom_setter(binding.name) {
                continue;
            }
            let key = ReentrancyGuard::key(binding.name, scope.label());
            let Some(_token) = self.guard.enter(&key) else {
                continue;
            };
            match scope.set(binding.name, value.clone()) {
                Ok(()) => written += 1,
                Err(e) => warn!(
                    name = binding.name,
                    scope = scope.label(),
                    error = %e,
                    "Failed to reflect state onto legacy global"
                ),
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::events::DATA_LOADED;
    use serde_json::json;
    use std::cell::Cell;

    fn count_events(store: &Rc<PathStore>, event: &str) -> (Rc<Cell<usize>>, Subscription) {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let sub = store.subscribe(event, move |_: &StateEvent| h.set(h.get() + 1));
        (hits, sub)
    }

    fn bridged() -> (Rc<PathStore>, Rc<GlobalScope>, LegacyBridge) {
        let store = PathStore::new();
        let global = GlobalScope::new("global");
        let bridge = LegacyBridge::install(store.clone(), global.clone());
        (store, global, bridge)
    }

    #[test]
    fn test_install_defines_accessors_on_both_scopes() {
        let (_store, global, _bridge) = bridged();
        let window = global.window().unwrap();
        for binding in DEFAULT_BINDINGS {
            assert!(global.has_custom_setter(binding.name));
            assert!(window.has_custom_setter(binding.name));
        }
    }

    #[test]
    fn test_global_write_converges_with_single_store_write() {
        let (store, global, _bridge) = bridged();
        let (writes, _sub) = count_events(&store, "data.globalData-changed");
        let payload = json!({"recordMesgs": [1]});

        global.set("globalData", payload.clone()).unwrap();

        assert_eq!(global.get("globalData"), Some(payload.clone()));
        assert_eq!(global.window().unwrap().get("globalData"), Some(payload.clone()));
        assert_eq!(store.get("data.globalData"), Some(payload));
        assert_eq!(writes.get(), 1);
    }

    #[test]
    fn test_store_write_converges_with_single_store_write() {
        let (store, global, _bridge) = bridged();
        let (writes, _sub) = count_events(&store, "data.globalData-changed");
        let payload = json!({"recordMesgs": [1, 2]});

        store.set("data.globalData", payload.clone(), SetMeta::default());

        assert_eq!(global.get("globalData"), Some(payload.clone()));
        assert_eq!(writes.get(), 1);
    }

    #[test]
    fn test_legacy_write_fires_domain_events() {
        let (store, global, _bridge) = bridged();
        store.register_derived_events("data.globalData", |_| vec![DATA_LOADED]);
        let (loaded, _sub) = count_events(&store, DATA_LOADED);
        global.window().unwrap().set("globalData", json!({"a": 1})).unwrap();
        assert_eq!(loaded.get(), 1);
    }

    #[test]
    fn test_pre_existing_global_is_hydrated() {
        let store = PathStore::new();
        let global = GlobalScope::new("global");
        global.define_data("mapMarkerCount", json!(250));
        global.ensure_window().define_data("heartRateZones", json!([{"zone": 1}]));

        let _bridge = LegacyBridge::install(store.clone(), global.clone());

        assert_eq!(store.get("map.markerCount"), Some(json!(250)));
        assert_eq!(store.get("zones.heartRate"), Some(json!([{"zone": 1}])));
        assert!(global.has_custom_setter("mapMarkerCount"));
        assert!(global.window().unwrap().has_custom_setter("heartRateZones"));
    }

    #[test]
    fn test_plain_value_assigned_after_install_is_adopted_at_read() {
        let (store, global, _bridge) = bridged();
        let window = global.window().unwrap();
        window.define_data("_highlightedOverlayIdx", json!(3));

        assert_eq!(global.get("_highlightedOverlayIdx"), Some(json!(3)));
        assert_eq!(store.get("overlays.highlightedOverlayIdx"), Some(json!(3)));
        assert!(window.has_custom_setter("_highlightedOverlayIdx"));
    }

    #[test]
    fn test_null_plain_value_is_not_adopted() {
        let store = PathStore::new();
        store.set("data.globalData", json!({"keep": true}), SetMeta::default());
        let global = GlobalScope::new("global");
        global.define_data("globalData", Value::Null);
        let _bridge = LegacyBridge::install(store.clone(), global.clone());
        assert_eq!(store.get("data.globalData"), Some(json!({"keep": true})));
    }

    #[test]
    fn test_read_falls_back_to_last_known_value() {
        let (store, global, bridge) = bridged();
        global.set("powerZones", json!([100, 200])).unwrap();
        assert_eq!(bridge.last_known("powerZones"), Some(json!([100, 200])));

        // Simulate a store that lost the path
        store.set("zones", json!({}), SetMeta::default().silent());
        assert_eq!(store.get("zones.power"), None);
        assert_eq!(global.get("powerZones"), Some(json!([100, 200])));
    }

    #[test]
    fn test_rejected_write_is_not_served_by_getter() {
        let (store, global, bridge) = bridged();
        store.register_validator("map.markerCount", |v| v.is_u64());

        global.set("mapMarkerCount", json!("lots")).unwrap();
        assert_eq!(store.get("map.markerCount"), None);
        assert_eq!(global.get("mapMarkerCount"), None);
        assert_eq!(bridge.last_known("mapMarkerCount"), None);

        global.set("mapMarkerCount", json!(40)).unwrap();
        global.set("mapMarkerCount", json!(-1)).unwrap();
        assert_eq!(global.get("mapMarkerCount"), Some(json!(40)));
        assert_eq!(bridge.last_known("mapMarkerCount"), Some(json!(40)));
    }

    #[test]
    fn test_commit_hook_replaces_raw_store_write() {
        let store = PathStore::new();
        let global = GlobalScope::new("global");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (sink, target) = (seen.clone(), store.clone());
        let commit: CommitFn = Rc::new(move |value: Value, meta: SetMeta| {
            sink.borrow_mut().push(meta.reflect);
            let loaded = !value.is_null();
            target.set("data.globalData", value, meta.clone())
                && target.set("data.isLoaded", json!(loaded), meta)
        });
        let commits = HashMap::from([("globalData", commit)]);
        let _bridge =
            LegacyBridge::install_with(store.clone(), global.clone(), DEFAULT_BINDINGS, commits);

        global.set("globalData", json!({"recordMesgs": [1]})).unwrap();
        assert_eq!(store.get("data.isLoaded"), Some(json!(true)));
        assert_eq!(*seen.borrow(), vec![false]);

        // Bindings without a hook still go straight to the store
        global.set("mapMarkerCount", json!(3)).unwrap();
        assert_eq!(store.get("map.markerCount"), Some(json!(3)));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_reentrant_write_from_listener_is_dropped() {
        let (store, global, _bridge) = bridged();
        let (writes, _count) = count_events(&store, "map.markerCount-changed");
        let g = global.clone();
        let _echo = store.subscribe_path("map.markerCount", move |_: &StateEvent| {
            // A listener that writes the same global back must not loop
            let _ = g.set("mapMarkerCount", json!(999));
        });

        global.set("mapMarkerCount", json!(10)).unwrap();
        assert_eq!(store.get("map.markerCount"), Some(json!(10)));
        assert_eq!(writes.get(), 1);
    }

    #[test]
    fn test_reflection_updates_plain_data_slots() {
        let (store, global, bridge) = bridged();
        let window = global.window().unwrap();
        // Replace the accessor with a plain slot that holds nothing yet
        window.define_data("loadedFitFiles", Value::Null);

        store.set("overlays.loadedFitFiles", json!([{"filePath": "a.fit"}]), SetMeta::default());
        assert_eq!(window.data_value("loadedFitFiles"), Some(json!([{"filePath": "a.fit"}])));

        // Bridge-originated writes are not reflected
        store.set("overlays.loadedFitFiles", json!([]), SetMeta::default().without_reflection());
        assert_eq!(window.data_value("loadedFitFiles"), Some(json!([{"filePath": "a.fit"}])));

        assert_eq!(bridge.reflect("loadedFitFiles"), 1);
        assert_eq!(window.data_value("loadedFitFiles"), Some(json!([])));
        assert_eq!(bridge.reflect("notBridged"), 0);
    }

    #[test]
    fn test_install_failure_degrades_gracefully() {
        let store = PathStore::new();
        let global = GlobalScope::new("global");
        global.define_frozen("powerZones", json!([1]));

        let _bridge = LegacyBridge::install(store.clone(), global.clone());

        // Hydration still adopted the value; the frozen slot stays stale
        assert_eq!(store.get("zones.power"), Some(json!([1])));
        store.set("zones.power", json!([2]), SetMeta::default());
        assert_eq!(global.get("powerZones"), Some(json!([1])));
        assert_eq!(global.window().unwrap().get("powerZones"), Some(json!([2])));
    }

    #[test]
    fn test_uninstall_restores_data_properties() {
        let (store, global, bridge) = bridged();
        global.set("mapMarkerCount", json!(75)).unwrap();
        bridge.uninstall();

        assert_eq!(global.data_value("mapMarkerCount"), Some(json!(75)));
        store.set("map.markerCount", json!(5), SetMeta::default());
        assert_eq!(global.get("mapMarkerCount"), Some(json!(75)));
    }

    #[test]
    fn test_guard_token_releases_on_drop() {
        let guard = ReentrancyGuard::default();
        let key = ReentrancyGuard::key("globalData", "window");
        {
            let _token = guard.enter(&key).unwrap();
            assert!(guard.is_active(&key));
            assert!(guard.enter(&key).is_none());
        }
        assert!(!guard.is_active(&key));
    }
}
