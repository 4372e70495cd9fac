//! Benchmark utilities.

#![warn(missing_docs)]

use livetree_data::{Node, Path, Priority};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Generate a flat branch of `count` numbered children with random priorities.
pub fn flat_children(count: usize) -> Node {
    let mut rng = rand::thread_rng();
    let children: BTreeMap<String, Node> = (0..count)
        .map(|i| {
            let priority = if rng.gen_bool(0.5) {
                Priority::from(rng.gen_range(0..100i64))
            } else {
                Priority::None
            };
            (format!("item_{i:05}"), Node::from(i as i64).with_priority(priority))
        })
        .collect();
    Node::branch(children)
}

/// Generate a JSON document `depth` levels deep with `width` children per level.
pub fn nested_json(depth: usize, width: usize) -> Value {
    if depth == 0 {
        return json!("leaf");
    }
    let mut map = Map::new();
    for i in 0..width {
        map.insert(format!("key_{i}"), nested_json(depth - 1, width));
    }
    Value::Object(map)
}

/// Generate `count` random paths at most `depth` segments deep, drawn from
/// `width` names per level.
pub fn random_paths(count: usize, depth: usize, width: usize) -> Vec<Path> {
    let mut rng = rand::thread_rng();
    let names: Vec<String> = (0..width).map(|i| format!("key_{i}")).collect();
    (0..count)
        .map(|_| {
            let len = rng.gen_range(1..=depth);
            let segments: Vec<&String> = (0..len)
                .filter_map(|_| names.choose(&mut rng))
                .collect();
            Path::from_segments(segments).unwrap_or_default()
        })
        .collect()
}
