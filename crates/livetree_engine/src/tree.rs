//! The synchronized tree.
//!
//! [`SyncTree`] keeps two layers:
//!
//! - the server layer, the last authoritative value known at every path;
//! - an ordered list of optimistic writes, applied on top in write order.
//!
//! Reads compute the merged view: the server value with every visible
//! write at an overlapping path replayed over it. Reverting a write simply
//! drops it from the list, so the view falls back to the next most recent
//! write or, absent any, the server value.
//!
//! # Invariants
//!
//! - Writes are kept in write-id order
//! - Acknowledged writes are folded into the server layer in order, once
//!   every earlier write has been resolved
//! - A server update supersedes every acknowledged write at or below its
//!   path, so confirmed data never masks newer authority state
//! - The merged view is a pure function of the server layer and the list

use livetree_data::{Node, Path, Priority};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Identifies an optimistic write. Monotonic per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteId(pub u64);

impl fmt::Display for WriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// The effect of one write on the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the node (removal is an overwrite with [`Node::Empty`]).
    Overwrite(Node),
    /// Replace the named children only.
    Merge(BTreeMap<String, Node>),
    /// Change the priority of an existing node.
    Priority(Priority),
}

impl WriteOp {
    /// Applies this operation to `base` for a write at `write_path`, and
    /// returns the resulting node at `read_path`.
    fn apply(&self, write_path: &Path, read_path: &Path, base: Node) -> Node {
        if let Some(below) = write_path.relative(read_path) {
            // The write covers the read location.
            return match self {
                WriteOp::Overwrite(node) => node.get(&below).clone(),
                WriteOp::Merge(children) => match below.front() {
                    None => base.with_merge(&Path::root(), children),
                    Some(front) => match children.get(front) {
                        Some(child) => child.get(&below.pop_front()).clone(),
                        None => base,
                    },
                },
                WriteOp::Priority(priority) if below.is_root() => {
                    base.with_priority(priority.clone())
                }
                WriteOp::Priority(_) => base,
            };
        }
        if let Some(above) = read_path.relative(write_path) {
            // The write lands somewhere below the read location.
            return match self {
                WriteOp::Overwrite(node) => base.with_path(&above, node.clone()),
                WriteOp::Merge(children) => base.with_merge(&above, children),
                WriteOp::Priority(priority) => base.with_priority_at(&above, priority.clone()),
            };
        }
        base
    }
}

#[derive(Debug, Clone)]
struct OverlayWrite {
    id: WriteId,
    path: Path,
    op: WriteOp,
    visible: bool,
    acknowledged: bool,
    /// Locations below `path` where the server has since sent newer data.
    superseded: Vec<Path>,
}

impl OverlayWrite {
    /// Returns the node at `read_path` after this write. Superseded
    /// locations keep their `base` value.
    fn apply(&self, read_path: &Path, base: Node) -> Node {
        if self.superseded.is_empty() {
            return self.op.apply(&self.path, read_path, base);
        }
        if self.superseded.iter().any(|s| s.contains(read_path)) {
            return base;
        }
        let mut result = self.op.apply(&self.path, read_path, base.clone());
        for location in &self.superseded {
            if let Some(below) = read_path.relative(location) {
                result = result.with_path(&below, base.get(&below).clone());
            }
        }
        result
    }
}

/// In-memory tree holding the best known value at every path.
#[derive(Debug, Default, Clone)]
pub struct SyncTree {
    server: Node,
    writes: VecDeque<OverlayWrite>,
}

impl SyncTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the authoritative subtree at `path`.
    pub fn apply_server_update(&mut self, path: &Path, node: Node) {
        self.supersede(path);
        let server = std::mem::take(&mut self.server);
        self.server = server.with_path(path, node);
    }

    /// Replaces some authoritative children of `path`.
    pub fn apply_server_merge(&mut self, path: &Path, children: &BTreeMap<String, Node>) {
        for name in children.keys() {
            self.supersede(&path.child_key(name));
        }
        let server = std::mem::take(&mut self.server);
        self.server = server.with_merge(path, children);
    }

    /// Layers a local write over the server value.
    ///
    /// Hidden writes are tracked (and can be read through
    /// [`SyncTree::read_all`]) but do not show in [`SyncTree::read`].
    pub fn apply_optimistic_write(&mut self, id: WriteId, path: Path, op: WriteOp, visible: bool) {
        debug_assert!(
            self.writes.back().is_none_or(|w| w.id < id),
            "write ids must increase"
        );
        self.writes.push_back(OverlayWrite {
            id,
            path,
            op,
            visible,
            acknowledged: false,
            superseded: Vec::new(),
        });
    }

    /// Marks a write as confirmed by the authority.
    ///
    /// Confirmed writes at the front of the list are folded into the server
    /// layer, where they stay until a server update supersedes them.
    /// Returns false if the write is unknown.
    pub fn acknowledge(&mut self, id: WriteId) -> bool {
        let Some(write) = self.writes.iter_mut().find(|w| w.id == id) else {
            return false;
        };
        write.acknowledged = true;
        self.compact();
        true
    }

    /// Removes an optimistic write. Returns its path, or `None` if unknown.
    pub fn revert(&mut self, id: WriteId) -> Option<Path> {
        let index = self.writes.iter().position(|w| w.id == id)?;
        let removed = self.writes.remove(index)?;
        self.compact();
        Some(removed.path)
    }

    /// Makes a hidden write visible to readers.
    pub fn reveal(&mut self, id: WriteId) {
        if let Some(write) = self.writes.iter_mut().find(|w| w.id == id) {
            write.visible = true;
        }
    }

    /// The merged view at `path`: server state with visible writes applied.
    pub fn read(&self, path: &Path) -> Node {
        self.merged(path, false)
    }

    /// The merged view including hidden writes.
    pub fn read_all(&self, path: &Path) -> Node {
        self.merged(path, true)
    }

    /// The last authoritative value at `path`.
    pub fn server_value(&self, path: &Path) -> &Node {
        self.server.get(path)
    }

    /// Number of unresolved writes.
    pub fn pending_count(&self) -> usize {
        self.writes.iter().filter(|w| !w.acknowledged).count()
    }

    /// Returns true if a pending write overlaps `path`.
    pub fn has_pending_at(&self, path: &Path) -> bool {
        self.writes
            .iter()
            .any(|w| !w.acknowledged && w.path.overlaps(path))
    }

    fn merged(&self, path: &Path, include_hidden: bool) -> Node {
        self.writes
            .iter()
            .filter(|w| include_hidden || w.visible)
            .filter(|w| w.path.overlaps(path))
            .fold(self.server.get(path).clone(), |base, write| {
                write.apply(path, base)
            })
    }

    /// Stops acknowledged writes from covering `path`: those at or below it
    /// are dropped, those above it leave it to the server layer. Pending
    /// writes are untouched and keep shadowing the update.
    fn supersede(&mut self, path: &Path) {
        self.writes
            .retain(|w| !(w.acknowledged && path.contains(&w.path)));
        for write in self
            .writes
            .iter_mut()
            .filter(|w| w.acknowledged && w.path.contains(path))
        {
            write.superseded.retain(|s| !path.contains(s));
            write.superseded.push(path.clone());
        }
    }

    fn compact(&mut self) {
        while self.writes.front().is_some_and(|w| w.acknowledged) {
            if let Some(write) = self.writes.pop_front() {
                let server = std::mem::take(&mut self.server);
                self.server = write.apply(&Path::root(), server);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livetree_data::node_from_json;
    use proptest::prelude::*;
    use serde_json::json;

    fn path(p: &str) -> Path {
        Path::parse(p).unwrap()
    }

    fn node(value: serde_json::Value) -> Node {
        node_from_json(&value).unwrap()
    }

    #[test]
    fn optimistic_write_shadows_server_value() {
        let mut tree = SyncTree::new();
        tree.apply_server_update(&path("x"), node(json!({"a": 0, "b": 0})));
        tree.apply_optimistic_write(WriteId(1), path("x/a"), WriteOp::Overwrite(Node::from(1)), true);

        assert_eq!(tree.read(&path("x")), node(json!({"a": 1, "b": 0})));
        assert_eq!(tree.server_value(&path("x/a")), &Node::from(0));
    }

    #[test]
    fn server_update_below_pending_write_stays_hidden() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Overwrite(node(json!({"a": 1}))), true);
        tree.apply_server_update(&path("x/a"), Node::from(9));

        assert_eq!(tree.read(&path("x/a")), Node::from(1));
        tree.revert(WriteId(1));
        assert_eq!(tree.read(&path("x/a")), Node::from(9));
    }

    #[test]
    fn revert_falls_back_to_earlier_write() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Overwrite(Node::from(1)), true);
        tree.apply_optimistic_write(WriteId(2), path("x"), WriteOp::Overwrite(Node::from(2)), true);
        assert_eq!(tree.read(&path("x")), Node::from(2));

        tree.revert(WriteId(2));
        assert_eq!(tree.read(&path("x")), Node::from(1));
        tree.revert(WriteId(1));
        assert!(tree.read(&path("x")).is_empty());
    }

    #[test]
    fn reject_first_accept_second() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Overwrite(node(json!({"a": 1}))), true);
        tree.apply_optimistic_write(WriteId(2), path("x/a"), WriteOp::Overwrite(Node::from(2)), true);

        tree.revert(WriteId(1));
        assert!(tree.acknowledge(WriteId(2)));
        assert_eq!(tree.read(&path("x")), node(json!({"a": 2})));
        assert_eq!(tree.pending_count(), 0);
        assert_eq!(tree.server_value(&path("x/a")), &Node::from(2));
    }

    #[test]
    fn acknowledged_write_waits_for_earlier_writes() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Overwrite(Node::from(1)), true);
        tree.apply_optimistic_write(WriteId(2), path("y"), WriteOp::Overwrite(Node::from(2)), true);

        tree.acknowledge(WriteId(2));
        assert!(tree.server_value(&path("y")).is_empty());
        assert_eq!(tree.read(&path("y")), Node::from(2));

        tree.acknowledge(WriteId(1));
        assert_eq!(tree.server_value(&path("x")), &Node::from(1));
        assert_eq!(tree.server_value(&path("y")), &Node::from(2));
    }

    #[test]
    fn newer_server_update_replaces_acknowledged_write() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Overwrite(Node::from(1)), true);
        tree.apply_optimistic_write(WriteId(2), path("y"), WriteOp::Overwrite(Node::from(2)), true);
        tree.acknowledge(WriteId(2));

        tree.apply_server_update(&path("y"), Node::from(5));
        assert_eq!(tree.read(&path("y")), Node::from(5));

        tree.acknowledge(WriteId(1));
        assert_eq!(tree.server_value(&path("y")), &Node::from(5));
        assert_eq!(tree.read(&path("y")), Node::from(5));
        assert_eq!(tree.read(&path("x")), Node::from(1));
    }

    #[test]
    fn server_update_below_acknowledged_write_shows_through() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("p"), WriteOp::Overwrite(Node::from(0)), true);
        tree.apply_optimistic_write(WriteId(2), path("x"), WriteOp::Overwrite(node(json!({"a": 1, "b": 1}))), true);
        tree.acknowledge(WriteId(2));

        tree.apply_server_update(&path("x/a"), Node::from(7));
        assert_eq!(tree.read(&path("x")), node(json!({"a": 7, "b": 1})));
        assert_eq!(tree.read(&path("x/a")), Node::from(7));

        tree.revert(WriteId(1));
        assert_eq!(tree.server_value(&path("x")), &node(json!({"a": 7, "b": 1})));
        assert_eq!(tree.pending_count(), 0);
    }

    #[test]
    fn server_merge_supersedes_acknowledged_children() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("p"), WriteOp::Overwrite(Node::from(0)), true);
        tree.apply_optimistic_write(WriteId(2), path("x/a"), WriteOp::Overwrite(Node::from(1)), true);
        tree.acknowledge(WriteId(2));

        let merge = BTreeMap::from([("a".to_string(), Node::from(5))]);
        tree.apply_server_merge(&path("x"), &merge);
        assert_eq!(tree.read(&path("x/a")), Node::from(5));

        tree.acknowledge(WriteId(1));
        assert_eq!(tree.server_value(&path("x/a")), &Node::from(5));
    }

    #[test]
    fn server_update_stays_hidden_under_pending_write() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Overwrite(Node::from(1)), true);
        tree.apply_server_update(&path("x"), Node::from(9));
        assert_eq!(tree.read(&path("x")), Node::from(1));

        tree.acknowledge(WriteId(1));
        assert_eq!(tree.server_value(&path("x")), &Node::from(1));
    }

    #[test]
    fn merge_touches_only_named_children() {
        let mut tree = SyncTree::new();
        tree.apply_server_update(&path("x"), node(json!({"a": 1, "b": 2})));
        let merge = BTreeMap::from([("b".to_string(), Node::Empty), ("c".to_string(), Node::from(3))]);
        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Merge(merge), true);

        assert_eq!(tree.read(&path("x")), node(json!({"a": 1, "c": 3})));
        assert_eq!(tree.read(&path("x/c")), Node::from(3));
        assert_eq!(tree.read(&path("x/a")), Node::from(1));
    }

    #[test]
    fn priority_write_reorders_without_changing_value() {
        let mut tree = SyncTree::new();
        tree.apply_server_update(&path("list/a"), Node::from(1));
        tree.apply_optimistic_write(WriteId(1), path("list/a"), WriteOp::Priority(Priority::Number(4.0)), true);

        let read = tree.read(&path("list/a"));
        assert!(read.same_value(&Node::from(1)));
        assert_eq!(read.priority(), &Priority::Number(4.0));
        assert_eq!(tree.read(&path("list")).child("a").priority(), &Priority::Number(4.0));
    }

    #[test]
    fn hidden_writes_only_show_in_read_all() {
        let mut tree = SyncTree::new();
        tree.apply_optimistic_write(WriteId(1), path("n"), WriteOp::Overwrite(Node::from(5)), false);
        assert!(tree.read(&path("n")).is_empty());
        assert_eq!(tree.read_all(&path("n")), Node::from(5));

        tree.reveal(WriteId(1));
        assert_eq!(tree.read(&path("n")), Node::from(5));
    }

    #[test]
    fn revert_restores_previous_view() {
        let mut tree = SyncTree::new();
        tree.apply_server_update(&Path::root(), node(json!({"x": {"a": 1}, "y": 2})));
        let before = tree.read(&Path::root());

        tree.apply_optimistic_write(WriteId(1), path("x"), WriteOp::Overwrite(Node::from("z")), true);
        assert_ne!(tree.read(&Path::root()), before);
        tree.revert(WriteId(1));
        assert_eq!(tree.read(&Path::root()), before);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Server(&'static str, i64),
        Write(&'static str, i64),
        Ack(u64),
        Revert(u64),
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        let paths = prop::sample::select(vec!["a", "a/b", "a/c", "d", "a/b/e"]);
        prop_oneof![
            (paths.clone(), 0i64..5).prop_map(|(p, v)| Step::Server(p, v)),
            (paths, 0i64..5).prop_map(|(p, v)| Step::Write(p, v)),
            (1u64..10).prop_map(Step::Ack),
            (1u64..10).prop_map(Step::Revert),
        ]
    }

    fn replay(steps: &[Step]) -> Node {
        let mut tree = SyncTree::new();
        let mut next = 1;
        for step in steps {
            match step {
                Step::Server(p, v) => tree.apply_server_update(&path(p), Node::from(*v)),
                Step::Write(p, v) => {
                    tree.apply_optimistic_write(WriteId(next), path(p), WriteOp::Overwrite(Node::from(*v)), true);
                    next += 1;
                }
                Step::Ack(id) => {
                    tree.acknowledge(WriteId(*id));
                }
                Step::Revert(id) => {
                    tree.revert(WriteId(*id));
                }
            }
        }
        tree.read(&Path::root())
    }

    #[derive(Debug, Clone)]
    enum Exchange {
        Server(&'static str, i64),
        Write(&'static str, i64),
        Accept(usize),
        Reject(usize),
    }

    fn exchange_strategy() -> impl Strategy<Value = Exchange> {
        let paths = prop::sample::select(vec!["a", "a/b", "a/c", "d", "a/b/e"]);
        prop_oneof![
            1 => (paths.clone(), 0i64..5).prop_map(|(p, v)| Exchange::Server(p, v)),
            2 => (paths, 0i64..5).prop_map(|(p, v)| Exchange::Write(p, v)),
            1 => (0usize..4).prop_map(Exchange::Accept),
            1 => (0usize..4).prop_map(Exchange::Reject),
        ]
    }

    /// Plays an exchange against both the tree and a model authority.
    /// The authority accepts a write only once every earlier overlapping
    /// write has been resolved, as a single ordered connection would.
    fn converge(exchanges: &[Exchange]) -> (SyncTree, Node) {
        let mut tree = SyncTree::new();
        let mut authority = Node::Empty;
        let mut pending: Vec<(WriteId, Path, Node)> = Vec::new();
        let mut next = 0;
        for exchange in exchanges {
            match exchange {
                Exchange::Server(p, v) => {
                    authority = authority.with_path(&path(p), Node::from(*v));
                    tree.apply_server_update(&path(p), Node::from(*v));
                }
                Exchange::Write(p, v) => {
                    next += 1;
                    tree.apply_optimistic_write(WriteId(next), path(p), WriteOp::Overwrite(Node::from(*v)), true);
                    pending.push((WriteId(next), path(p), Node::from(*v)));
                }
                Exchange::Accept(i) if !pending.is_empty() => {
                    let i = i % pending.len();
                    let blocked = pending[..i].iter().any(|(_, p, _)| p.overlaps(&pending[i].1));
                    let (id, p, node) = pending.remove(if blocked { 0 } else { i });
                    authority = authority.with_path(&p, node);
                    tree.acknowledge(id);
                }
                Exchange::Reject(i) if !pending.is_empty() => {
                    let (id, _, _) = pending.remove(i % pending.len());
                    tree.revert(id);
                }
                Exchange::Accept(_) | Exchange::Reject(_) => {}
            }
        }
        for (id, _, _) in pending {
            tree.revert(id);
        }
        (tree, authority)
    }

    proptest! {
        #[test]
        fn replay_is_deterministic(steps in prop::collection::vec(step_strategy(), 0..30)) {
            prop_assert_eq!(replay(&steps), replay(&steps));
        }

        #[test]
        fn resolved_tree_matches_authority(exchanges in prop::collection::vec(exchange_strategy(), 0..40)) {
            let (tree, authority) = converge(&exchanges);
            prop_assert_eq!(tree.pending_count(), 0);
            prop_assert_eq!(tree.read(&Path::root()), authority.clone());
            prop_assert_eq!(tree.server_value(&Path::root()), &authority);
        }

        #[test]
        fn revert_of_last_write_restores_view(
            steps in prop::collection::vec(step_strategy(), 0..20),
            value in 10i64..20,
        ) {
            let mut tree = SyncTree::new();
            let mut next = 1;
            for step in &steps {
                match step {
                    Step::Server(p, v) => tree.apply_server_update(&path(p), Node::from(*v)),
                    Step::Write(p, v) => {
                        tree.apply_optimistic_write(WriteId(next), path(p), WriteOp::Overwrite(Node::from(*v)), true);
                        next += 1;
                    }
                    Step::Ack(id) => { tree.acknowledge(WriteId(*id)); }
                    Step::Revert(id) => { tree.revert(WriteId(*id)); }
                }
            }
            let before = tree.read(&Path::root());
            tree.apply_optimistic_write(WriteId(1000), path("a/b"), WriteOp::Overwrite(Node::from(value)), true);
            tree.revert(WriteId(1000));
            prop_assert_eq!(tree.read(&Path::root()), before);
        }
    }
}
