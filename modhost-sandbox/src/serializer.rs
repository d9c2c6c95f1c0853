//! Depth-bounded snapshot of the host world graph.
//!
//! Depth is the only cycle breaker: objects at or beyond the configured depth
//! become a terminal null, whether or not they were seen before. The walk
//! therefore terminates on any graph in O(nodes x depth).

use modhost_types::{WorldObject, WorldValue};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;

/// Acyclic, serializable form of a [`WorldValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum BoundedTree {
    Null,
    Bool(bool),
    Int(i64),
    /// Kept wide until encoding; encoded as decimal text.
    BigInt(i128),
    Float(f64),
    Text(String),
    List(Vec<BoundedTree>),
    Map(BTreeMap<String, BoundedTree>),
}

impl BoundedTree {
    pub fn get(&self, key: &str) -> Option<&BoundedTree> {
        match self {
            Self::Map(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Final encode step: every value becomes portable JSON.
    pub fn encode(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(v) => Value::Bool(*v),
            Self::Int(v) => Value::from(*v),
            Self::BigInt(v) => Value::String(v.to_string()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(v) => Value::String(v.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::encode).collect()),
            Self::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.encode()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for BoundedTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::BigInt(v) => serializer.serialize_str(&v.to_string()),
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Self::Float(_) => serializer.serialize_unit(),
            Self::Text(v) => serializer.serialize_str(v),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSerializer {
    max_depth: usize,
}

impl StateSerializer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn to_bounded_tree(&self, value: &WorldValue) -> BoundedTree {
        self.walk(value, 0)
    }

    fn walk(&self, value: &WorldValue, depth: usize) -> BoundedTree {
        match value {
            WorldValue::Null => BoundedTree::Null,
            WorldValue::Bool(v) => BoundedTree::Bool(*v),
            WorldValue::Int(v) => BoundedTree::Int(*v),
            WorldValue::BigInt(v) => BoundedTree::BigInt(*v),
            WorldValue::Float(v) => BoundedTree::Float(*v),
            WorldValue::Text(v) => BoundedTree::Text(v.clone()),
            WorldValue::List(items) => BoundedTree::List(
                items.iter().map(|item| self.walk(item, depth + 1)).collect(),
            ),
            WorldValue::Object(obj) => self.walk_object(obj, depth),
        }
    }

    fn walk_object(&self, obj: &WorldObject, depth: usize) -> BoundedTree {
        if depth >= self.max_depth {
            return BoundedTree::Null;
        }
        BoundedTree::Map(
            obj.fields()
                .into_iter()
                .map(|(key, field)| {
                    let bounded = self.walk(&field, depth + 1);
                    (key, bounded)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cyclic_tile() -> WorldObject {
        let tile = WorldObject::new().with("id", "tile-1");
        let building = WorldObject::new()
            .with("id", "building-1")
            .with("tile", tile.clone());
        tile.set("building", building);
        tile
    }

    #[test]
    fn cycle_is_cut_at_max_depth() {
        let tile = cyclic_tile();
        let tree = StateSerializer::new(3).to_bounded_tree(&WorldValue::Object(tile.clone()));

        let building = tree.get("building").unwrap();
        let tile_again = building.get("tile").unwrap();
        assert_eq!(tile_again.get("id"), Some(&BoundedTree::Text("tile-1".into())));
        assert!(tile_again.get("building").unwrap().is_null());

        tile.clear();
    }

    #[test]
    fn zero_depth_nulls_root_object_but_keeps_scalars() {
        let serializer = StateSerializer::new(0);
        let obj = WorldObject::new().with("a", 1i64);
        assert!(serializer.to_bounded_tree(&obj.into()).is_null());
        assert_eq!(serializer.to_bounded_tree(&WorldValue::Int(7)), BoundedTree::Int(7));
    }

    #[test]
    fn lists_recurse_one_level_per_element() {
        let inner = WorldObject::new().with("k", true);
        let root = WorldObject::new().with("items", vec![WorldValue::from(inner), WorldValue::Int(2)]);
        // root (0) -> items list (1) -> element object (2)
        let shallow = StateSerializer::new(2).to_bounded_tree(&root.clone().into());
        assert_eq!(
            shallow.encode(),
            json!({"items": [null, 2]})
        );
        let deep = StateSerializer::new(3).to_bounded_tree(&root.into());
        assert_eq!(deep.encode(), json!({"items": [{"k": true}, 2]}));
    }

    #[test]
    fn big_integers_encode_as_text() {
        let obj = WorldObject::new().with("balance", i128::MAX);
        let tree = StateSerializer::new(4).to_bounded_tree(&obj.into());
        assert_eq!(
            tree.encode(),
            json!({"balance": "170141183460469231731687303715884105727"})
        );
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({"balance": "170141183460469231731687303715884105727"})
        );
    }

    #[test]
    fn non_finite_floats_encode_as_null() {
        let tree = StateSerializer::new(1).to_bounded_tree(&WorldValue::Float(f64::NAN));
        assert_eq!(tree.encode(), serde_json::Value::Null);
        assert_eq!(serde_json::to_value(&tree).unwrap(), serde_json::Value::Null);
    }
}
