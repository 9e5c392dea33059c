//! The decoded payload of the file currently on screen

use std::rc::Rc;

use serde_json::{Value, json};
use tracing::debug;

use crate::constants::{events, paths};
use crate::state::{ChangeEvent, PathStore, SetMeta};

/// Lifecycle event for a write of `new` over `old`; `None` when nothing
/// meaningful happened (null over null, or an identical payload)
pub fn lifecycle_event(old: Option<&Value>, new: Option<&Value>) -> Option<&'static str> {
    let old = old.filter(|v| !v.is_null());
    let new = new.filter(|v| !v.is_null());
    match (old, new) {
        (None, Some(_)) => Some(events::DATA_LOADED),
        (Some(_), None) => Some(events::DATA_CLEARED),
        (Some(a), Some(b)) if a != b => Some(events::DATA_CHANGED),
        _ => None,
    }
}

pub struct GlobalDataState {
    store: Rc<PathStore>,
}

impl GlobalDataState {
    pub fn default_slice() -> Value {
        json!({ "globalData": null, "isLoaded": false })
    }

    pub fn new(store: Rc<PathStore>) -> Self {
        store.register_derived_events(paths::GLOBAL_DATA, |change: &ChangeEvent| {
            lifecycle_event(change.old_value.as_ref(), change.new_value.as_ref())
                .into_iter()
                .collect()
        });
        Self { store }
    }

    pub fn global_data(&self) -> Option<Value> {
        self.store.get(paths::GLOBAL_DATA).filter(|v| !v.is_null())
    }

    pub fn is_loaded(&self) -> bool {
        self.store.with(paths::DATA_IS_LOADED, |v| v.and_then(Value::as_bool).unwrap_or(false))
    }

    /// Replace the payload and keep `data.isLoaded` in step
    pub fn set_global_data(&self, data: Value, meta: SetMeta) -> bool {
        let loaded = !data.is_null();
        if !self.store.set(paths::GLOBAL_DATA, data, meta.clone()) {
            return false;
        }
        if self.is_loaded() != loaded {
            self.store.set(paths::DATA_IS_LOADED, Value::Bool(loaded), meta);
        }
        debug!(loaded = loaded, "Global data replaced");
        true
    }

    pub fn clear_global_data(&self) -> bool {
        self.set_global_data(Value::Null, SetMeta::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateEvent, Subscription};
    use std::cell::RefCell;

    fn tracker(store: &Rc<PathStore>) -> (Rc<RefCell<Vec<String>>>, Vec<Subscription>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let subs = [events::DATA_LOADED, events::DATA_CLEARED, events::DATA_CHANGED]
            .into_iter()
            .map(|name| {
                let sink = seen.clone();
                store.subscribe(name, move |e: &StateEvent| sink.borrow_mut().push(e.name.clone()))
            })
            .collect();
        (seen, subs)
    }

    #[test]
    fn test_lifecycle_classification() {
        let data = json!({"recordMesgs": [1]});
        assert_eq!(lifecycle_event(None, Some(&data)), Some(events::DATA_LOADED));
        assert_eq!(lifecycle_event(Some(&Value::Null), Some(&data)), Some(events::DATA_LOADED));
        assert_eq!(lifecycle_event(Some(&data), Some(&Value::Null)), Some(events::DATA_CLEARED));
        assert_eq!(lifecycle_event(Some(&data), Some(&json!({}))), Some(events::DATA_CHANGED));
        assert_eq!(lifecycle_event(Some(&data), Some(&data)), None);
        assert_eq!(lifecycle_event(None, Some(&Value::Null)), None);
    }

    #[test]
    fn test_data_lifecycle_events() {
        let store = PathStore::new();
        let data = GlobalDataState::new(store.clone());
        let (seen, _subs) = tracker(&store);

        store.set(paths::GLOBAL_DATA, Value::Null, SetMeta::default());
        store.set(paths::GLOBAL_DATA, json!({"recordMesgs": [1]}), SetMeta::default());
        store.set(paths::GLOBAL_DATA, Value::Null, SetMeta::default());
        data.set_global_data(json!({"recordMesgs": [1]}), SetMeta::default());
        data.set_global_data(json!({"recordMesgs": [1, 2]}), SetMeta::default());

        assert_eq!(
            *seen.borrow(),
            vec![
                events::DATA_LOADED,
                events::DATA_CLEARED,
                events::DATA_LOADED,
                events::DATA_CHANGED
            ]
        );
    }

    #[test]
    fn test_is_loaded_tracks_payload() {
        let store = PathStore::new();
        let data = GlobalDataState::new(store.clone());
        assert!(!data.is_loaded());
        data.set_global_data(json!({"a": 1}), SetMeta::default());
        assert!(data.is_loaded());
        assert_eq!(data.global_data(), Some(json!({"a": 1})));
        data.clear_global_data();
        assert!(!data.is_loaded());
        assert_eq!(data.global_data(), None);
    }
}
