//! Tree nodes.
//!
//! A [`Node`] is either absent, a leaf holding a primitive, or a branch
//! holding named children. Absent nodes never carry a priority and branches
//! never hold absent children: every constructor prunes, so the stored tree
//! only contains nodes that exist.

use crate::error::{DataError, DataResult};
use crate::path::{validate_key, Path};
use crate::priority::{compare_siblings, Priority};
use std::collections::BTreeMap;

/// A primitive leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// Boolean.
    Bool(bool),
    /// Number, always finite.
    Number(f64),
    /// UTF-8 string.
    String(String),
}

/// A node of the synchronized tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Node {
    /// No data at this location.
    #[default]
    Empty,
    /// A primitive value.
    Leaf {
        /// The value.
        value: Primitive,
        /// Ordering key among siblings.
        priority: Priority,
    },
    /// A node with at least one child.
    Branch {
        /// Children by name. Never empty, never holds [`Node::Empty`].
        children: BTreeMap<String, Node>,
        /// Ordering key among siblings.
        priority: Priority,
    },
}

impl Node {
    /// Creates a leaf without priority.
    pub fn leaf(value: Primitive) -> Self {
        Node::Leaf {
            value,
            priority: Priority::None,
        }
    }

    /// Creates a branch from children, pruning empty ones.
    ///
    /// Returns [`Node::Empty`] when nothing remains.
    pub fn branch<I>(children: I) -> Self
    where
        I: IntoIterator<Item = (String, Node)>,
    {
        let children: BTreeMap<String, Node> = children
            .into_iter()
            .filter(|(_, child)| !child.is_empty())
            .collect();
        if children.is_empty() {
            Node::Empty
        } else {
            Node::Branch {
                children,
                priority: Priority::None,
            }
        }
    }

    /// Returns true for [`Node::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Returns true for leaves.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// The primitive value of a leaf.
    pub fn primitive(&self) -> Option<&Primitive> {
        match self {
            Node::Leaf { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The priority of this node. Absent nodes have none.
    pub fn priority(&self) -> &Priority {
        match self {
            Node::Empty => &Priority::None,
            Node::Leaf { priority, .. } | Node::Branch { priority, .. } => priority,
        }
    }

    /// Returns a copy with the given priority. Absent nodes stay priority-less.
    pub fn with_priority(mut self, new_priority: Priority) -> Self {
        match &mut self {
            Node::Empty => {}
            Node::Leaf { priority, .. } | Node::Branch { priority, .. } => {
                *priority = new_priority;
            }
        }
        self
    }

    /// Children of a branch, keyed by name.
    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Branch { children, .. } => Some(children),
            _ => None,
        }
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children().map_or(0, BTreeMap::len)
    }

    /// Returns the named child, or [`Node::Empty`].
    pub fn child(&self, name: &str) -> &Node {
        static EMPTY: Node = Node::Empty;
        match self {
            Node::Branch { children, .. } => children.get(name).unwrap_or(&EMPTY),
            _ => &EMPTY,
        }
    }

    /// Returns the node at a relative path, or [`Node::Empty`].
    pub fn get(&self, path: &Path) -> &Node {
        path.segments()
            .iter()
            .fold(self, |node, segment| node.child(segment))
    }

    /// Replaces the named child, pruning if it becomes empty.
    ///
    /// Writing into a leaf discards the leaf value, so the result is a
    /// branch (or empty). The priority of `self` is kept unless the result
    /// is empty.
    pub fn with_child(self, name: &str, child: Node) -> Node {
        let (mut children, priority) = match self {
            Node::Branch { children, priority } => (children, priority),
            Node::Leaf { priority, .. } => (BTreeMap::new(), priority),
            Node::Empty => (BTreeMap::new(), Priority::None),
        };
        if child.is_empty() {
            children.remove(name);
        } else {
            children.insert(name.to_string(), child);
        }
        if children.is_empty() {
            Node::Empty
        } else {
            Node::Branch { children, priority }
        }
    }

    /// Replaces the node at a relative path.
    pub fn with_path(self, path: &Path, node: Node) -> Node {
        match path.front() {
            None => node,
            Some(front) => {
                let current = self.child(front).clone();
                let updated = current.with_path(&path.pop_front(), node);
                self.with_child(front, updated)
            }
        }
    }

    /// Applies a shallow merge at a relative path: each named child is
    /// replaced, other children are untouched.
    pub fn with_merge(self, path: &Path, merge: &BTreeMap<String, Node>) -> Node {
        let mut target = self.get(path).clone();
        for (name, child) in merge {
            target = target.with_child(name, child.clone());
        }
        self.with_path(path, target)
    }

    /// Sets the priority of the node at a relative path. No effect if that
    /// node is absent.
    pub fn with_priority_at(self, path: &Path, priority: Priority) -> Node {
        let target = self.get(path);
        if target.is_empty() {
            return self;
        }
        let updated = target.clone().with_priority(priority);
        self.with_path(path, updated)
    }

    /// Children sorted by priority ordering.
    pub fn ordered_children(&self) -> Vec<(&str, &Node)> {
        let mut children: Vec<(&str, &Node)> = match self {
            Node::Branch { children, .. } => {
                children.iter().map(|(k, v)| (k.as_str(), v)).collect()
            }
            _ => Vec::new(),
        };
        children.sort_by(|(an, a), (bn, b)| compare_siblings(an, a.priority(), bn, b.priority()));
        children
    }

    /// Checks a node built in code against the rules the JSON importer
    /// enforces.
    ///
    /// Keys must be valid, numbers and priorities finite, branches
    /// non-empty with no absent children, and nesting at most `max_depth`
    /// levels deep.
    pub fn validate(&self, max_depth: usize) -> DataResult<()> {
        self.validate_at(0, max_depth)
    }

    fn validate_at(&self, depth: usize, max_depth: usize) -> DataResult<()> {
        if depth > max_depth {
            return Err(DataError::TooDeep { limit: max_depth });
        }
        self.priority().validate()?;
        match self {
            Node::Empty => Ok(()),
            Node::Leaf {
                value: Primitive::Number(n),
                ..
            } if !n.is_finite() => Err(DataError::InvalidNumber(*n)),
            Node::Leaf { .. } => Ok(()),
            Node::Branch { children, .. } => {
                if children.is_empty() {
                    return Err(DataError::invalid_value("branch without children"));
                }
                for (key, child) in children {
                    validate_key(key)?;
                    if child.is_empty() {
                        return Err(DataError::invalid_value(format!(
                            "child {key:?} is absent"
                        )));
                    }
                    child.validate_at(depth + 1, max_depth)?;
                }
                Ok(())
            }
        }
    }

    /// Same node ignoring priority: used to tell value changes from
    /// pure reordering.
    pub fn same_value(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Leaf { value: a, .. }, Node::Leaf { value: b, .. }) => a == b,
            (Node::Branch { children: a, .. }, Node::Branch { children: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::leaf(Primitive::Bool(value))
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::leaf(Primitive::String(value.to_string()))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::leaf(Primitive::String(value))
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::leaf(Primitive::Number(value as f64))
    }
}
