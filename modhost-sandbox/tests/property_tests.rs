//! Property tests for ref assignment and bounded world snapshots.

use modhost_sandbox::{BoundedTree, CallbackRegistry, StateSerializer};
use modhost_types::{WorldObject, WorldValue};
use proptest::prelude::*;
use rhai::{Array, Dynamic, FnPtr, Map};
use std::collections::HashSet;

fn callback() -> Dynamic {
    Dynamic::from(FnPtr::new("handler").unwrap())
}

/// `layout[c][k] = (buttons, has_submit)` for content `k` of component `c`.
fn build_response(layout: &[Vec<(usize, bool)>]) -> Dynamic {
    let mut components = Array::new();
    for (c, contents) in layout.iter().enumerate() {
        let mut entries = Array::new();
        for (k, (buttons, has_submit)) in contents.iter().enumerate() {
            let mut entry = Map::new();
            entry.insert("id".into(), Dynamic::from(format!("content-{k}")));
            if *has_submit {
                entry.insert("submit".into(), callback());
            }
            let mut list = Array::new();
            for _ in 0..*buttons {
                let mut button = Map::new();
                button.insert("type".into(), Dynamic::from("action"));
                button.insert("action".into(), callback());
                list.push(Dynamic::from(button));
            }
            entry.insert("buttons".into(), Dynamic::from(list));
            entries.push(Dynamic::from(entry));
        }
        let mut component = Map::new();
        component.insert("id".into(), Dynamic::from(format!("component-{c}")));
        component.insert("content".into(), Dynamic::from(entries));
        components.push(Dynamic::from(component));
    }
    let mut root = Map::new();
    root.insert("components".into(), Dynamic::from(components));
    Dynamic::from(root)
}

fn map_depth(tree: &BoundedTree) -> usize {
    match tree {
        BoundedTree::Map(fields) => 1 + fields.values().map(map_depth).max().unwrap_or(0),
        BoundedTree::List(items) => items.iter().map(map_depth).max().unwrap_or(0),
        _ => 0,
    }
}

proptest! {
    #[test]
    fn every_callback_gets_a_distinct_ref(
        layout in prop::collection::vec(
            prop::collection::vec((0usize..5, any::<bool>()), 0..4),
            0..5,
        ),
        cycle in 1u64..1_000,
    ) {
        let expected: usize = layout
            .iter()
            .flatten()
            .map(|(buttons, submit)| buttons + usize::from(*submit))
            .sum();

        let mut raw = build_response(&layout);
        let mut registry = CallbackRegistry::new("prop", cycle);
        registry.substitute(&mut raw).unwrap();

        let refs: HashSet<&str> = registry.refs().collect();
        prop_assert_eq!(registry.len(), expected);
        prop_assert_eq!(refs.len(), expected);
        let suffix = format!("#{cycle}");
        for reference in refs {
            prop_assert!(reference.ends_with(&suffix));
            prop_assert!(registry.resolve(reference).is_some());
        }
    }

    #[test]
    fn snapshot_terminates_on_cyclic_graphs(
        nodes in 1usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..12),
        max_depth in 0usize..6,
    ) {
        let objects: Vec<WorldObject> = (0..nodes)
            .map(|i| WorldObject::new().with("id", i as i64))
            .collect();
        for (n, (from, to)) in edges.iter().enumerate() {
            let (from, to) = (from % nodes, to % nodes);
            objects[from].set(format!("edge{n}"), objects[to].clone());
        }

        let serializer = StateSerializer::new(max_depth);
        let tree = serializer.to_bounded_tree(&WorldValue::Object(objects[0].clone()));
        prop_assert!(map_depth(&tree) <= max_depth);
        prop_assert_eq!(tree.is_null(), max_depth == 0);

        for object in &objects {
            object.clear();
        }
    }
}
