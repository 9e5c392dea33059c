//! The path store: a single `serde_json::Value` tree behind dotted paths
//!
//! Every write goes through [`PathStore::set`] (or one of its variants) and
//! emits a `<path>-changed` event plus any domain events registered for that
//! path. The store is single-threaded: listeners run synchronously on the
//! caller's stack and may read or write state themselves.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::events::{
    BatchEvent, ChangeEvent, EventPayload, ListenerId, ListenerRegistry, StateEvent,
};
use super::path::{self, changed_event};
use super::{now_millis, StateError};
use crate::constants::events::BATCH_UPDATE;

type Validator = Rc<dyn Fn(&Value) -> bool>;
type DerivedEvents = Rc<dyn Fn(&ChangeEvent) -> Vec<&'static str>>;

/// Metadata attached to a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetMeta {
    /// Origin of the write, carried into the change event
    pub source: Option<String>,
    /// Mirror the new value onto legacy globals (bridge-originated writes clear this)
    pub reflect: bool,
    /// Skip event emission entirely
    pub silent: bool,
}

impl Default for SetMeta {
    fn default() -> Self {
        Self {
            source: None,
            reflect: true,
            silent: false,
        }
    }
}

impl SetMeta {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn without_reflection(mut self) -> Self {
        self.reflect = false;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Handle returned by [`PathStore::subscribe`]
#[must_use = "dropping a Subscription keeps the listener registered"]
#[derive(Debug)]
pub struct Subscription {
    store: Weak<PathStore>,
    event: String,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.store
            .upgrade()
            .is_some_and(|store| store.off(&self.event, self.id))
    }
}

/// Central state tree with path-scoped change notification
pub struct PathStore {
    tree: RefCell<Value>,
    listeners: ListenerRegistry,
    validators: RefCell<HashMap<String, Validator>>,
    derived: RefCell<HashMap<String, Vec<DerivedEvents>>>,
    writes: Cell<u64>,
}

impl std::fmt::Debug for PathStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathStore")
            .field("events", &self.listeners.event_names())
            .field("writes", &self.writes.get())
            .finish()
    }
}

impl PathStore {
    pub fn new() -> Rc<Self> {
        Self::with_tree(Value::Object(Map::new()))
    }

    /// Create a store seeded with an initial tree
    pub fn with_tree(tree: Value) -> Rc<Self> {
        Rc::new(Self {
            tree: RefCell::new(tree),
            listeners: ListenerRegistry::default(),
            validators: RefCell::new(HashMap::new()),
            derived: RefCell::new(HashMap::new()),
            writes: Cell::new(0),
        })
    }

    /// Read the value at `path`; `None` if any segment is missing
    pub fn get(&self, path: &str) -> Option<Value> {
        let segs = path::segments(path).ok()?;
        path::lookup(&self.tree.borrow(), &segs).cloned()
    }

    /// Borrow the value at `path` without cloning it.
    ///
    /// `f` runs while the tree is borrowed; it must not write to the store.
    pub fn with<R>(&self, path: &str, f: impl FnOnce(Option<&Value>) -> R) -> R {
        let tree = self.tree.borrow();
        match path::segments(path) {
            Ok(segs) => f(path::lookup(&tree, &segs)),
            Err(_) => f(None),
        }
    }

    /// Read and decode the value at `path` into a typed record
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.try_get_as(path).unwrap_or_else(|e| {
            debug!(path = %path, error = %e, "Failed to decode state value");
            None
        })
    }

    pub fn try_get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StateError> {
        match self.get(path) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StateError::Decode {
                    path: path.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.with(path, |v| v.is_some())
    }

    /// Write `value` at `path`, creating missing intermediate objects
    pub fn try_set(&self, path: &str, value: Value, meta: SetMeta) -> Result<(), StateError> {
        let segs = path::segments(path)?;
        self.write(&segs, path, value, meta)
    }

    /// Like [`try_set`](Self::try_set) but logs failures and returns `false`
    pub fn set(&self, path: &str, value: Value, meta: SetMeta) -> bool {
        match self.try_set(path, value, meta) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path, error = %e, "State write rejected");
                false
            }
        }
    }

    /// Write one child of the object at `parent`, treating `key` as a single
    /// segment even if it contains dots
    pub fn set_child(&self, parent: &str, key: &str, value: Value, meta: SetMeta) -> bool {
        let full_path = format!("{parent}.{key}");
        let result = path::segments(parent).and_then(|mut segs| {
            if key.is_empty() {
                return Err(StateError::EmptySegment(full_path.clone()));
            }
            segs.push(key);
            self.write(&segs, &full_path, value, meta)
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %full_path, error = %e, "State write rejected");
                false
            }
        }
    }

    /// Shallow-merge an object into the object at `path`; plain set otherwise
    pub fn try_merge(&self, path: &str, value: Value, meta: SetMeta) -> Result<(), StateError> {
        let merged = match (self.get(path), value) {
            (Some(Value::Object(mut current)), Value::Object(patch)) => {
                current.extend(patch);
                Value::Object(current)
            }
            (_, value) => value,
        };
        self.try_set(path, merged, meta)
    }

    pub fn merge(&self, path: &str, value: Value, meta: SetMeta) -> bool {
        match self.try_merge(path, value, meta) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path, error = %e, "State merge rejected");
                false
            }
        }
    }

    /// Apply several writes in path order, then emit one batch event.
    ///
    /// Not atomic: the first failing write stops the batch and earlier writes
    /// stay applied. The batch event still reports what was applied.
    pub fn try_update(
        &self,
        entries: BTreeMap<String, Value>,
        meta: SetMeta,
    ) -> Result<(), StateError> {
        let mut before = Map::new();
        let mut after = Map::new();
        let mut applied = Vec::with_capacity(entries.len());
        let mut failure = None;

        for (path, value) in entries {
            let old = self.get(&path).unwrap_or(Value::Null);
            match self.try_set(&path, value.clone(), meta.clone()) {
                Ok(()) => {
                    before.insert(path.clone(), old);
                    after.insert(path.clone(), value);
                    applied.push(path);
                }
                Err(e) => {
                    warn!(
                        path = %path,
                        error = %e,
                        applied = applied.len(),
                        "Batch update stopped"
                    );
                    failure = Some(e);
                    break;
                }
            }
        }

        if !meta.silent && !applied.is_empty() {
            let batch = BatchEvent {
                paths: applied,
                before: Value::Object(before),
                after: Value::Object(after),
                timestamp: now_millis(),
            };
            self.listeners
                .dispatch(&StateEvent::new(BATCH_UPDATE, EventPayload::Batch(batch)));
        }

        failure.map_or(Ok(()), Err)
    }

    pub fn update(&self, entries: BTreeMap<String, Value>, meta: SetMeta) -> bool {
        self.try_update(entries, meta).is_ok()
    }

    /// Register a listener for an event name or a `<path>-changed` string
    pub fn subscribe(
        self: &Rc<Self>,
        event: &str,
        listener: impl Fn(&StateEvent) + 'static,
    ) -> Subscription {
        let id = self.listeners.add(event, Rc::new(listener));
        Subscription {
            store: Rc::downgrade(self),
            event: event.to_string(),
            id,
        }
    }

    /// Shorthand for subscribing to `<path>-changed`
    pub fn subscribe_path(
        self: &Rc<Self>,
        path: &str,
        listener: impl Fn(&StateEvent) + 'static,
    ) -> Subscription {
        self.subscribe(&changed_event(path), listener)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }

    /// Emit a custom domain event; returns how many listeners ran cleanly
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.listeners
            .dispatch(&StateEvent::new(event, EventPayload::Custom(payload)))
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    /// Reject future writes to `path` unless `validator` accepts the value
    pub fn register_validator(&self, path: &str, validator: impl Fn(&Value) -> bool + 'static) {
        self.validators
            .borrow_mut()
            .insert(path.to_string(), Rc::new(validator));
    }

    /// Attach domain events derived from writes to `path`
    pub fn register_derived_events(
        &self,
        path: &str,
        derive: impl Fn(&ChangeEvent) -> Vec<&'static str> + 'static,
    ) {
        self.derived
            .borrow_mut()
            .entry(path.to_string())
            .or_default()
            .push(Rc::new(derive));
    }

    /// Deep copy of the entire tree. Expensive; debugging and export only.
    pub fn snapshot(&self) -> Value {
        self.tree.borrow().clone()
    }

    /// Number of successful writes since creation
    pub fn write_count(&self) -> u64 {
        self.writes.get()
    }

    fn write(
        &self,
        segs: &[&str],
        display_path: &str,
        value: Value,
        meta: SetMeta,
    ) -> Result<(), StateError> {
        let validator = self.validators.borrow().get(display_path).cloned();
        if let Some(validator) = validator
            && !validator(&value)
        {
            return Err(StateError::Rejected(display_path.to_string()));
        }

        let old_value = {
            let mut tree = self.tree.borrow_mut();
            path::assign(&mut tree, segs, value.clone(), display_path)?
        };
        self.writes.set(self.writes.get() + 1);

        if meta.silent {
            return Ok(());
        }

        let change = ChangeEvent {
            path: display_path.to_string(),
            new_value: Some(value),
            old_value,
            timestamp: now_millis(),
            source: meta.source,
            reflect: meta.reflect,
        };
        self.notify(change);
        Ok(())
    }

    fn notify(&self, change: ChangeEvent) {
        let derivers = self
            .derived
            .borrow()
            .get(&change.path)
            .cloned()
            .unwrap_or_default();

        let derived: Vec<&'static str> = derivers.iter().flat_map(|d| d(&change)).collect();

        self.listeners.dispatch(&StateEvent::new(
            changed_event(&change.path),
            EventPayload::Change(change.clone()),
        ));
        for name in derived {
            self.listeners
                .dispatch(&StateEvent::new(name, EventPayload::Change(change.clone())));
        }
    }
}
