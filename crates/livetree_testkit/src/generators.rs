//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that generated writes collide
//! often enough to exercise shadowing, merging and reordering.

use livetree_data::{Node, Path, Primitive, Priority};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for valid child names.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
}

/// Strategy for paths up to three segments deep, root included.
pub fn path_strategy() -> impl Strategy<Value = Path> {
    prop::collection::vec(key_strategy(), 0..3)
        .prop_map(|segments| Path::from_segments(segments).unwrap_or_default())
}

/// Strategy for priorities of every kind.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        2 => Just(Priority::None),
        2 => (-5i32..5).prop_map(Priority::from),
        1 => prop::sample::select(vec!["x", "y", "z"]).prop_map(Priority::from),
    ]
}

/// Strategy for primitive leaves.
pub fn primitive_strategy() -> impl Strategy<Value = Primitive> {
    prop_oneof![
        any::<bool>().prop_map(Primitive::Bool),
        (-100i32..100).prop_map(|n| Primitive::Number(f64::from(n))),
        "[a-z]{0,6}".prop_map(Primitive::String),
    ]
}

/// Strategy for trees up to three levels deep. Branches never hold empty
/// children, matching what the importer produces.
pub fn node_strategy() -> impl Strategy<Value = Node> {
    let leaf = (primitive_strategy(), priority_strategy())
        .prop_map(|(value, priority)| Node::leaf(value).with_priority(priority));
    let leaf = prop_oneof![1 => Just(Node::Empty), 4 => leaf];
    leaf.prop_recursive(3, 24, 4, |inner| {
        (prop::collection::btree_map(key_strategy(), inner, 0..4), priority_strategy())
            .prop_map(|(children, priority)| Node::branch(children).with_priority(priority))
    })
}

/// One local or remote change in a generated history.
#[derive(Debug, Clone)]
pub enum TreeStep {
    /// Authority overwrite.
    Server {
        /// Location.
        path: Path,
        /// New value.
        node: Node,
    },
    /// Optimistic overwrite.
    Set {
        /// Location.
        path: Path,
        /// New value.
        node: Node,
    },
    /// Optimistic merge.
    Update {
        /// Location.
        path: Path,
        /// Children to replace.
        children: BTreeMap<String, Node>,
    },
    /// Optimistic priority change.
    SetPriority {
        /// Location.
        path: Path,
        /// New priority.
        priority: Priority,
    },
    /// Authority accepts the oldest unresolved write.
    AckOldest,
    /// Authority rejects the oldest unresolved write.
    RejectOldest,
}

/// Strategy for a single [`TreeStep`].
pub fn tree_step_strategy() -> impl Strategy<Value = TreeStep> {
    prop_oneof![
        2 => (path_strategy(), node_strategy()).prop_map(|(path, node)| TreeStep::Server { path, node }),
        3 => (path_strategy(), node_strategy()).prop_map(|(path, node)| TreeStep::Set { path, node }),
        1 => (path_strategy(), prop::collection::btree_map(key_strategy(), node_strategy(), 1..3))
            .prop_map(|(path, children)| TreeStep::Update { path, children }),
        1 => (path_strategy(), priority_strategy())
            .prop_map(|(path, priority)| TreeStep::SetPriority { path, priority }),
        2 => Just(TreeStep::AckOldest),
        1 => Just(TreeStep::RejectOldest),
    ]
}

/// Strategy for a history of `min..max` steps.
pub fn tree_history_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<TreeStep>> {
    prop::collection::vec(tree_step_strategy(), min..max)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
