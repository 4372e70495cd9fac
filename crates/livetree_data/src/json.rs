//! JSON import and export.
//!
//! Import is the validation boundary for dynamically typed payloads:
//! everything that cannot be represented as a [`Node`] is rejected here.
//!
//! The export format keeps priorities inline:
//!
//! ```json
//! { "score": { ".value": 12, ".priority": 1 }, ".priority": "top" }
//! ```

use crate::error::{DataError, DataResult};
use crate::node::{Node, Primitive};
use crate::path::validate_key;
use crate::priority::Priority;
use serde_json::{Map, Number, Value};

/// Default maximum nesting depth of an imported value.
pub const DEFAULT_MAX_DEPTH: usize = 32;

const PRIORITY_KEY: &str = ".priority";
const VALUE_KEY: &str = ".value";

/// Converts JSON into a node using the default depth limit.
///
/// `null` becomes [`Node::Empty`], arrays become branches keyed by index,
/// and `.priority` / `.value` keys are honoured.
pub fn node_from_json(value: &Value) -> DataResult<Node> {
    node_from_json_with_depth(value, DEFAULT_MAX_DEPTH)
}

/// Converts JSON into a node, rejecting values nested deeper than `max_depth`.
pub fn node_from_json_with_depth(value: &Value, max_depth: usize) -> DataResult<Node> {
    import(value, 0, max_depth)
}

fn import(value: &Value, depth: usize, max_depth: usize) -> DataResult<Node> {
    if depth > max_depth {
        return Err(DataError::TooDeep { limit: max_depth });
    }
    match value {
        Value::Null => Ok(Node::Empty),
        Value::Bool(b) => Ok(Node::leaf(Primitive::Bool(*b))),
        Value::Number(n) => Ok(Node::leaf(Primitive::Number(finite(n)?))),
        Value::String(s) => Ok(Node::leaf(Primitive::String(s.clone()))),
        Value::Array(items) => {
            let mut children = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                children.push((index.to_string(), import(item, depth + 1, max_depth)?));
            }
            Ok(Node::branch(children))
        }
        Value::Object(map) => import_object(map, depth, max_depth),
    }
}

fn import_object(map: &Map<String, Value>, depth: usize, max_depth: usize) -> DataResult<Node> {
    let priority = match map.get(PRIORITY_KEY) {
        Some(p) => priority_from_json(p)?,
        None => Priority::None,
    };

    if let Some(inner) = map.get(VALUE_KEY) {
        if map.keys().any(|k| k != VALUE_KEY && k != PRIORITY_KEY) {
            return Err(DataError::invalid_value(
                "\".value\" cannot be combined with child keys",
            ));
        }
        let node = match inner {
            Value::Object(_) | Value::Array(_) => {
                return Err(DataError::invalid_value("\".value\" must hold a primitive"))
            }
            other => import(other, depth + 1, max_depth)?,
        };
        return Ok(node.with_priority(priority));
    }

    let mut children = Vec::with_capacity(map.len());
    for (key, child) in map {
        if key == PRIORITY_KEY {
            continue;
        }
        validate_key(key)?;
        children.push((key.clone(), import(child, depth + 1, max_depth)?));
    }
    Ok(Node::branch(children).with_priority(priority))
}

fn finite(n: &Number) -> DataResult<f64> {
    let value = n
        .as_f64()
        .ok_or_else(|| DataError::invalid_value(format!("unrepresentable number {n}")))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DataError::InvalidNumber(value))
    }
}

/// Converts JSON into a priority: `null`, a number or a string.
pub fn priority_from_json(value: &Value) -> DataResult<Priority> {
    match value {
        Value::Null => Ok(Priority::None),
        Value::Number(n) => Priority::number(finite(n)?),
        Value::String(s) => Ok(Priority::String(s.clone())),
        other => Err(DataError::InvalidPriority(format!(
            "priority must be null, a number or a string, got {other}"
        ))),
    }
}

/// Converts a priority into JSON.
pub fn priority_to_json(priority: &Priority) -> Value {
    match priority {
        Priority::None => Value::Null,
        Priority::Number(n) => number_to_json(*n),
        Priority::String(s) => Value::String(s.clone()),
    }
}

/// Plain JSON for a node, without priorities.
pub fn node_to_json(node: &Node) -> Value {
    match node {
        Node::Empty => Value::Null,
        Node::Leaf { value, .. } => primitive_to_json(value),
        Node::Branch { children, .. } => Value::Object(
            children
                .iter()
                .map(|(k, v)| (k.clone(), node_to_json(v)))
                .collect(),
        ),
    }
}

/// JSON for a node including `.priority` and `.value` keys.
pub fn node_export(node: &Node) -> Value {
    match node {
        Node::Empty => Value::Null,
        Node::Leaf { value, priority } if priority.is_none() => primitive_to_json(value),
        Node::Leaf { value, priority } => {
            let mut map = Map::new();
            map.insert(VALUE_KEY.into(), primitive_to_json(value));
            map.insert(PRIORITY_KEY.into(), priority_to_json(priority));
            Value::Object(map)
        }
        Node::Branch { children, priority } => {
            let mut map: Map<String, Value> = children
                .iter()
                .map(|(k, v)| (k.clone(), node_export(v)))
                .collect();
            if !priority.is_none() {
                map.insert(PRIORITY_KEY.into(), priority_to_json(priority));
            }
            Value::Object(map)
        }
    }
}

fn primitive_to_json(value: &Primitive) -> Value {
    match value {
        Primitive::Bool(b) => Value::Bool(*b),
        Primitive::Number(n) => number_to_json(*n),
        Primitive::String(s) => Value::String(s.clone()),
    }
}

fn number_to_json(n: f64) -> Value {
    // Integral values round-trip as JSON integers.
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
