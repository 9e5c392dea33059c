//! Property bag standing in for a host's global object
//!
//! A [`GlobalScope`] holds named properties that are either plain data slots
//! or accessor pairs. The bridge installs accessors here; legacy callers read
//! and write through [`GlobalScope::get`] / [`GlobalScope::set`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use crate::constants::legacy::WINDOW_ALIAS;

pub type Getter = Rc<dyn Fn() -> Option<Value>>;
pub type Setter = Rc<dyn Fn(Value)>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("property '{0}' is not configurable")]
    NonConfigurable(String),

    #[error("property '{0}' is read-only")]
    ReadOnly(String),
}

#[derive(Clone)]
enum Property {
    Data {
        value: Value,
        writable: bool,
        configurable: bool,
    },
    Accessor {
        get: Getter,
        set: Option<Setter>,
    },
}

/// Shape of a property, for callers deciding how to treat it
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Data(Value),
    Accessor { has_setter: bool },
}

pub struct GlobalScope {
    label: String,
    properties: RefCell<HashMap<String, Property>>,
    window: RefCell<Option<Rc<GlobalScope>>>,
}

impl std::fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.properties.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("GlobalScope")
            .field("label", &self.label)
            .field("properties", &names)
            .finish()
    }
}

impl GlobalScope {
    pub fn new(label: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            label: label.into(),
            properties: RefCell::new(HashMap::new()),
            window: RefCell::new(None),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn window(&self) -> Option<Rc<GlobalScope>> {
        self.window.borrow().clone()
    }

    /// Return the `window` alias, creating it when absent
    pub fn ensure_window(&self) -> Rc<GlobalScope> {
        self.window
            .borrow_mut()
            .get_or_insert_with(|| GlobalScope::new(WINDOW_ALIAS))
            .clone()
    }

    /// Read a property, invoking its getter for accessors
    pub fn get(&self, name: &str) -> Option<Value> {
        let property = self.properties.borrow().get(name).cloned();
        match property? {
            Property::Data { value, .. } => Some(value),
            Property::Accessor { get, .. } => get(),
        }
    }

    /// Assign a property: accessors route to their setter, everything else
    /// becomes (or stays) a plain data slot
    pub fn set(&self, name: &str, value: Value) -> Result<(), ScopeError> {
        let property = self.properties.borrow().get(name).cloned();
        match property {
            Some(Property::Accessor { set: Some(set), .. }) => {
                set(value);
                Ok(())
            }
            Some(Property::Accessor { set: None, .. })
            | Some(Property::Data { writable: false, .. }) => {
                Err(ScopeError::ReadOnly(name.to_string()))
            }
            Some(Property::Data { configurable, .. }) => {
                self.insert(name, Property::Data {
                    value,
                    writable: true,
                    configurable,
                });
                Ok(())
            }
            None => {
                self.define_data(name, value);
                Ok(())
            }
        }
    }

    /// Define (or redefine) a writable, configurable data property
    pub fn define_data(&self, name: &str, value: Value) {
        self.insert(name, Property::Data {
            value,
            writable: true,
            configurable: true,
        });
    }

    /// Define a read-only, non-configurable data property
    pub fn define_frozen(&self, name: &str, value: Value) {
        self.insert(name, Property::Data {
            value,
            writable: false,
            configurable: false,
        });
    }

    /// Replace a property with an accessor pair
    pub fn define_accessor(
        &self,
        name: &str,
        get: Getter,
        set: Option<Setter>,
    ) -> Result<(), ScopeError> {
        if !self.is_configurable(name) {
            return Err(ScopeError::NonConfigurable(name.to_string()));
        }
        self.insert(name, Property::Accessor { get, set });
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<bool, ScopeError> {
        let mut properties = self.properties.borrow_mut();
        if let Some(Property::Data { configurable: false, .. }) = properties.get(name) {
            return Err(ScopeError::NonConfigurable(name.to_string()));
        }
        Ok(properties.remove(name).is_some())
    }

    pub fn kind(&self, name: &str) -> Option<PropertyKind> {
        self.properties.borrow().get(name).map(|p| match p {
            Property::Data { value, .. } => PropertyKind::Data(value.clone()),
            Property::Accessor { set, .. } => PropertyKind::Accessor {
                has_setter: set.is_some(),
            },
        })
    }

    /// Whether `name` can be redefined; absent names are
    pub fn is_configurable(&self, name: &str) -> bool {
        !matches!(
            self.properties.borrow().get(name),
            Some(Property::Data { configurable: false, .. })
        )
    }

    pub fn has_custom_setter(&self, name: &str) -> bool {
        matches!(self.kind(name), Some(PropertyKind::Accessor { has_setter: true }))
    }

    /// Value of a plain data property, without invoking accessors
    pub fn data_value(&self, name: &str) -> Option<Value> {
        match self.kind(name)? {
            PropertyKind::Data(value) => Some(value),
            PropertyKind::Accessor { .. } => None,
        }
    }

    fn insert(&self, name: &str, property: Property) {
        self.properties.borrow_mut().insert(name.to_string(), property);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn test_data_properties() {
        let global = GlobalScope::new("global");
        assert_eq!(global.get("x"), None);
        global.set("x", json!(1)).unwrap();
        assert_eq!(global.get("x"), Some(json!(1)));
        assert_eq!(global.kind("x"), Some(PropertyKind::Data(json!(1))));
        assert!(global.delete("x").unwrap());
    }

    #[test]
    fn test_window_alias_created_once() {
        let global = GlobalScope::new("global");
        assert!(global.window().is_none());
        let a = global.ensure_window();
        let b = global.ensure_window();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.label(), "window");
    }

    #[test]
    fn test_accessor_routes_reads_and_writes() {
        let global = GlobalScope::new("global");
        let backing = Rc::new(RefCell::new(json!(0)));
        let (r, w) = (backing.clone(), backing.clone());
        global
            .define_accessor(
                "count",
                Rc::new(move || Some(r.borrow().clone())),
                Some(Rc::new(move |v: Value| *w.borrow_mut() = v)),
            )
            .unwrap();

        global.set("count", json!(5)).unwrap();
        assert_eq!(*backing.borrow(), json!(5));
        assert_eq!(global.get("count"), Some(json!(5)));
        assert!(global.has_custom_setter("count"));
        assert_eq!(global.data_value("count"), None);
    }

    #[test]
    fn test_frozen_property_rejects_accessor_and_writes() {
        let global = GlobalScope::new("global");
        global.define_frozen("locked", json!("v"));
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let err = global
            .define_accessor(
                "locked",
                Rc::new(move || -> Option<Value> {
                    c.set(c.get() + 1);
                    None
                }),
                None,
            )
            .unwrap_err();
        assert_eq!(err, ScopeError::NonConfigurable("locked".into()));
        assert_eq!(global.set("locked", json!("w")), Err(ScopeError::ReadOnly("locked".into())));
        assert_eq!(global.get("locked"), Some(json!("v")));
        assert_eq!(calls.get(), 0);
        assert!(!global.is_configurable("locked"));
        assert!(global.is_configurable("missing"));
    }

    #[test]
    fn test_getter_only_accessor_is_read_only() {
        let global = GlobalScope::new("global");
        global
            .define_accessor("ro", Rc::new(|| Some(json!(1))), None)
            .unwrap();
        assert!(global.set("ro", json!(2)).is_err());
        assert!(!global.has_custom_setter("ro"));
    }
}
