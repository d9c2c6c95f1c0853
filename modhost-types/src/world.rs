//! World-state graph as aggregated by the host.
//!
//! Objects are shared handles, so the graph may contain cycles
//! (`tile.building.tile` pointing back at `tile` is normal). Anything that
//! walks a [`WorldValue`] must bound its depth; see the sandbox crate's
//! `StateSerializer`.
//!
//! Strong cycles keep their objects alive until [`WorldObject::clear`] is
//! called on one of the members.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum WorldValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Integers wider than a guest integer (balances, chain ids).
    BigInt(i128),
    Float(f64),
    Text(String),
    List(Vec<WorldValue>),
    Object(WorldObject),
}

impl WorldValue {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn as_object(&self) -> Option<&WorldObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for WorldValue {
    /// Scalars and lists compare by value, objects by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for WorldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::BigInt(v) => write!(f, "BigInt({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Text(v) => write!(f, "Text({v:?})"),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Object(obj) => fmt::Debug::fmt(obj, f),
        }
    }
}

impl From<bool> for WorldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for WorldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i128> for WorldValue {
    fn from(value: i128) -> Self {
        Self::BigInt(value)
    }
}

impl From<f64> for WorldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for WorldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for WorldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<WorldValue>> for WorldValue {
    fn from(value: Vec<WorldValue>) -> Self {
        Self::List(value)
    }
}

impl From<WorldObject> for WorldValue {
    fn from(value: WorldObject) -> Self {
        Self::Object(value)
    }
}

/// Shared, mutable object node. Cloning shares the node.
#[derive(Clone, Default)]
pub struct WorldObject(Rc<RefCell<BTreeMap<String, WorldValue>>>);

impl WorldObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(self, key: impl Into<String>, value: impl Into<WorldValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<WorldValue>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<WorldValue> {
        self.0.borrow().get(key).cloned()
    }

    /// Snapshot of the fields in key order. Object-valued fields are shared.
    pub fn fields(&self) -> Vec<(String, WorldValue)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Drops every field, breaking any cycle running through this node.
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl fmt::Debug for WorldObject {
    // Only keys: the graph may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.borrow().keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_are_shared_handles() {
        let tile = WorldObject::new().with("q", 1i64);
        let alias = tile.clone();
        alias.set("r", 2i64);
        assert_eq!(tile.len(), 2);
        assert!(tile.ptr_eq(&alias));
    }

    #[test]
    fn cyclic_graph_debug_terminates() {
        let tile = WorldObject::new();
        let building = WorldObject::new().with("tile", tile.clone());
        tile.set("building", building.clone());

        let rendered = format!("{:?}", WorldValue::Object(tile.clone()));
        assert_eq!(rendered, "{\"building\"}");

        tile.clear();
        assert!(tile.is_empty());
    }

    #[test]
    fn object_equality_is_identity() {
        let a = WorldObject::new().with("k", "v");
        let b = WorldObject::new().with("k", "v");
        assert_ne!(WorldValue::from(a.clone()), WorldValue::from(b));
        assert_eq!(WorldValue::from(a.clone()), WorldValue::from(a));
    }
}
