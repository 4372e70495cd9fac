//! Listener events and the diff that produces them.
//!
//! A mutation is turned into events by comparing the view of a location
//! before and after it. One mutation yields one batch, ordered:
//! `ChildRemoved`, `ChildAdded`, `ChildMoved`, `ChildChanged`, then
//! `Value`. Within each kind, child events follow the priority order of
//! the new view (removals follow the old one).

use crate::snapshot::DataSnapshot;
use livetree_data::{Node, Path};
use std::collections::HashMap;
use std::fmt;

/// Kind of event a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// The whole value at the location changed.
    Value,
    /// A child appeared.
    ChildAdded,
    /// A child's data changed.
    ChildChanged,
    /// A child disappeared.
    ChildRemoved,
    /// A child changed rank among its siblings.
    ChildMoved,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Value => "value",
            EventKind::ChildAdded => "child_added",
            EventKind::ChildChanged => "child_changed",
            EventKind::ChildRemoved => "child_removed",
            EventKind::ChildMoved => "child_moved",
        })
    }
}

/// An event delivered to a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The location's data for `Value`, the child's data otherwise.
    /// Removal events carry the child as it was.
    pub snapshot: DataSnapshot,
    /// Name of the preceding sibling, for added, changed and moved children.
    pub prev_name: Option<String>,
}

impl Event {
    fn value(path: &Path, node: &Node) -> Self {
        Self {
            kind: EventKind::Value,
            snapshot: DataSnapshot::new(path.clone(), node.clone()),
            prev_name: None,
        }
    }

    fn child(kind: EventKind, path: &Path, name: &str, node: &Node, prev: Option<&str>) -> Self {
        Self {
            kind,
            snapshot: DataSnapshot::new(path.child_key(name), node.clone()),
            prev_name: prev.map(str::to_string),
        }
    }
}

/// Events describing `new` as if every child had just appeared.
pub(crate) fn initial_events(kind: EventKind, path: &Path, node: &Node) -> Vec<Event> {
    match kind {
        EventKind::Value => vec![Event::value(path, node)],
        EventKind::ChildAdded => {
            let mut prev = None;
            node.ordered_children()
                .into_iter()
                .map(|(name, child)| {
                    let event = Event::child(EventKind::ChildAdded, path, name, child, prev);
                    prev = Some(name);
                    event
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Events turning `old` into `new` at `path`. Empty when nothing changed.
pub(crate) fn diff(path: &Path, old: &Node, new: &Node) -> Vec<Event> {
    if old == new {
        return Vec::new();
    }
    let old_order = old.ordered_children();
    let new_order = new.ordered_children();
    let old_children: HashMap<&str, &Node> = old_order.iter().copied().collect();
    let new_children: HashMap<&str, &Node> = new_order.iter().copied().collect();

    let mut events = Vec::new();

    for (name, child) in &old_order {
        if !new_children.contains_key(name) {
            events.push(Event::child(EventKind::ChildRemoved, path, name, child, None));
        }
    }

    let new_prev = predecessors(&new_order, |_| true);
    for (name, child) in &new_order {
        if !old_children.contains_key(name) {
            let prev = new_prev.get(name).copied().flatten();
            events.push(Event::child(EventKind::ChildAdded, path, name, child, prev));
        }
    }

    // A move is a priority change that alters the child's neighbour among
    // the children present both before and after.
    let kept_before = predecessors(&old_order, |name| new_children.contains_key(name));
    let kept_after = predecessors(&new_order, |name| old_children.contains_key(name));
    for (name, child) in &new_order {
        let Some(old_child) = old_children.get(name) else {
            continue;
        };
        if old_child.priority() != child.priority() && kept_before.get(name) != kept_after.get(name)
        {
            let prev = new_prev.get(name).copied().flatten();
            events.push(Event::child(EventKind::ChildMoved, path, name, child, prev));
        }
    }

    for (name, child) in &new_order {
        if old_children.get(name).is_some_and(|old_child| *old_child != *child) {
            let prev = new_prev.get(name).copied().flatten();
            events.push(Event::child(EventKind::ChildChanged, path, name, child, prev));
        }
    }

    events.push(Event::value(path, new));
    events
}

/// Maps each selected child to the selected child preceding it.
fn predecessors<'a>(
    order: &[(&'a str, &'a Node)],
    keep: impl Fn(&str) -> bool,
) -> HashMap<&'a str, Option<&'a str>> {
    let mut prev = None;
    let mut result = HashMap::new();
    for &(name, _) in order {
        if keep(name) {
            result.insert(name, prev);
            prev = Some(name);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use livetree_data::node_from_json;
    use serde_json::{json, Value};

    fn node(value: Value) -> Node {
        node_from_json(&value).unwrap()
    }

    fn summary(events: &[Event]) -> Vec<(EventKind, Option<String>, Option<String>)> {
        events
            .iter()
            .map(|e| {
                (
                    e.kind,
                    e.snapshot.name().map(str::to_string),
                    e.prev_name.clone(),
                )
            })
            .collect()
    }

    fn list() -> Path {
        Path::parse("list").unwrap()
    }

    #[test]
    fn no_change_no_events() {
        let n = node(json!({"a": 1}));
        assert!(diff(&list(), &n, &n).is_empty());
    }

    #[test]
    fn additions_follow_priority_order() {
        let old = Node::Empty;
        let new = node(json!({
            "a": {".value": "x", ".priority": 3},
            "b": {".value": "y", ".priority": 1},
            "c": {".value": "z", ".priority": 2}
        }));
        let events = diff(&list(), &old, &new);
        assert_eq!(
            summary(&events),
            vec![
                (EventKind::ChildAdded, Some("b".into()), None),
                (EventKind::ChildAdded, Some("c".into()), Some("b".into())),
                (EventKind::ChildAdded, Some("a".into()), Some("c".into())),
                (EventKind::Value, Some("list".into()), None),
            ]
        );
    }

    #[test]
    fn batch_order_is_removed_added_moved_changed_value() {
        let old = node(json!({
            "gone": 1,
            "m": {".value": 1, ".priority": 1},
            "n": {".value": 1, ".priority": 2},
            "ch": {".value": 1, ".priority": 3}
        }));
        let new = node(json!({
            "new": 5,
            "m": {".value": 1, ".priority": 10},
            "n": {".value": 1, ".priority": 2},
            "ch": {".value": 2, ".priority": 3}
        }));
        let kinds: Vec<_> = diff(&list(), &old, &new).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ChildRemoved,
                EventKind::ChildAdded,
                EventKind::ChildMoved,
                EventKind::ChildChanged,
                EventKind::ChildChanged,
                EventKind::Value,
            ]
        );
    }

    #[test]
    fn priority_change_that_keeps_rank_is_not_a_move() {
        let old = node(json!({
            "a": {".value": 1, ".priority": 1},
            "b": {".value": 1, ".priority": 5}
        }));
        let new = node(json!({
            "a": {".value": 1, ".priority": 2},
            "b": {".value": 1, ".priority": 5}
        }));
        let events = diff(&list(), &old, &new);
        assert_eq!(
            summary(&events),
            vec![
                (EventKind::ChildChanged, Some("a".into()), None),
                (EventKind::Value, Some("list".into()), None),
            ]
        );
    }

    #[test]
    fn moved_child_reports_new_predecessor() {
        let old = node(json!({
            "a": {".value": 1, ".priority": 1},
            "b": {".value": 1, ".priority": 2},
            "c": {".value": 1, ".priority": 3}
        }));
        let new = node(json!({
            "a": {".value": 1, ".priority": 4},
            "b": {".value": 1, ".priority": 2},
            "c": {".value": 1, ".priority": 3}
        }));
        let events = diff(&list(), &old, &new);
        assert_eq!(
            summary(&events)[0],
            (EventKind::ChildMoved, Some("a".into()), Some("c".into()))
        );
    }

    #[test]
    fn removal_carries_old_child() {
        let old = node(json!({"a": 1, "b": 2}));
        let new = node(json!({"b": 2}));
        let events = diff(&list(), &old, &new);
        assert_eq!(events[0].kind, EventKind::ChildRemoved);
        assert_eq!(events[0].snapshot.value(), json!(1));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].snapshot.value(), json!({"b": 2}));
    }

    #[test]
    fn leaf_changes_only_fire_value() {
        let events = diff(&list(), &Node::from(1), &Node::from(2));
        assert_eq!(summary(&events), vec![(EventKind::Value, Some("list".into()), None)]);
    }

    #[test]
    fn initial_events_for_value_and_child_added() {
        let n = node(json!({"b": 2, "a": 1}));
        let value = initial_events(EventKind::Value, &list(), &n);
        assert_eq!(value.len(), 1);
        assert_eq!(value[0].snapshot.value(), json!({"a": 1, "b": 2}));

        let added = initial_events(EventKind::ChildAdded, &list(), &n);
        assert_eq!(
            summary(&added),
            vec![
                (EventKind::ChildAdded, Some("a".into()), None),
                (EventKind::ChildAdded, Some("b".into()), Some("a".into())),
            ]
        );
        assert!(initial_events(EventKind::ChildRemoved, &list(), &n).is_empty());
        assert_eq!(initial_events(EventKind::Value, &list(), &Node::Empty).len(), 1);
    }
}
