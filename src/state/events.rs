//! Event payloads and the listener registry behind `subscribe`

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, trace};

/// Identifier handed out for every registered listener
pub type ListenerId = u64;

/// Callback invoked for a dispatched event
pub type Listener = Rc<dyn Fn(&StateEvent)>;

/// Payload of a `<path>-changed` event and of path-derived domain events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub path: String,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
    pub timestamp: i64,
    /// Who performed the write (e.g. `"ui"`, `"legacy:globalData"`)
    pub source: Option<String>,
    /// Whether the legacy bridge should mirror this write onto globals
    pub reflect: bool,
}

/// Payload of the single event emitted after an `update()` batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEvent {
    /// Paths written, in application order
    pub paths: Vec<String>,
    /// `{ path: value }` before the batch (missing paths map to `null`)
    pub before: Value,
    /// `{ path: value }` after the batch
    pub after: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Change(ChangeEvent),
    Batch(BatchEvent),
    Custom(Value),
}

/// A named event delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub name: String,
    pub payload: EventPayload,
}

impl StateEvent {
    pub fn new(name: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn change(&self) -> Option<&ChangeEvent> {
        match &self.payload {
            EventPayload::Change(change) => Some(change),
            _ => None,
        }
    }

    pub fn batch(&self) -> Option<&BatchEvent> {
        match &self.payload {
            EventPayload::Batch(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn custom(&self) -> Option<&Value> {
        match &self.payload {
            EventPayload::Custom(value) => Some(value),
            _ => None,
        }
    }
}

/// Multimap of event name → listeners, in registration order
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: Cell<ListenerId>,
    listeners: RefCell<HashMap<String, Vec<(ListenerId, Listener)>>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, event: &str, listener: Listener) -> ListenerId {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.listeners
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove one listener; the event key goes away with its last listener
    pub(crate) fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.listeners.borrow().get(event).map_or(0, Vec::len)
    }

    pub(crate) fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke every listener for `event.name`; returns how many ran cleanly.
    ///
    /// The listener list is cloned before dispatch so callbacks may subscribe,
    /// unsubscribe or write state without hitting a held borrow.
    pub(crate) fn dispatch(&self, event: &StateEvent) -> usize {
        let targets: Vec<(ListenerId, Listener)> = match self.listeners.borrow().get(&event.name) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, listener) in targets {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(
                        event = %event.name,
                        listener = id,
                        panic = %message,
                        "State listener panicked"
                    );
                }
            }
        }
        trace!(event = %event.name, delivered = delivered, "Dispatched state event");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn custom(name: &str) -> StateEvent {
        StateEvent::new(name, EventPayload::Custom(json!(null)))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = ListenerRegistry::default();
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            registry.add("evt", Rc::new(move |_: &StateEvent| order.borrow_mut().push(n)));
        }
        assert_eq!(registry.dispatch(&custom("evt")), 3);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    fn panicking_listener(_: &StateEvent) {
        panic!("bad listener");
    }

    #[test]
    fn test_panicking_listener_does_not_stop_siblings() {
        let registry = ListenerRegistry::default();
        let hits = Rc::new(Cell::new(0));
        registry.add("evt", Rc::new(panicking_listener));
        let h = hits.clone();
        registry.add("evt", Rc::new(move |_: &StateEvent| h.set(h.get() + 1)));

        assert_eq!(registry.dispatch(&custom("evt")), 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_remove_last_listener_drops_key() {
        let registry = ListenerRegistry::default();
        let a = registry.add("evt", Rc::new(|_: &StateEvent| {}));
        let b = registry.add("evt", Rc::new(|_: &StateEvent| {}));
        assert!(registry.remove("evt", a));
        assert_eq!(registry.count("evt"), 1);
        assert!(registry.remove("evt", b));
        assert!(registry.event_names().is_empty());
        assert!(!registry.remove("evt", b));
    }

    #[test]
    fn test_listener_can_unsubscribe_during_dispatch() {
        let registry = Rc::new(ListenerRegistry::default());
        let hits = Rc::new(Cell::new(0));
        let id_cell = Rc::new(Cell::new(0));

        let reg = registry.clone();
        let ids = id_cell.clone();
        let h = hits.clone();
        let id = registry.add(
            "evt",
            Rc::new(move |_: &StateEvent| {
                h.set(h.get() + 1);
                reg.remove("evt", ids.get());
            }),
        );
        id_cell.set(id);

        registry.dispatch(&custom("evt"));
        registry.dispatch(&custom("evt"));
        assert_eq!(hits.get(), 1);
    }
}
