//! Read-only views of tree data, and the mutable view given to transactions.

use crate::error::SyncResult;
use livetree_data::{
    node_export, node_from_json, node_to_json, Node, Path, Priority, DEFAULT_MAX_DEPTH,
};
use serde_json::Value;

/// An immutable copy of the data at a location.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    path: Path,
    node: Node,
}

impl DataSnapshot {
    /// Creates a snapshot.
    pub fn new(path: Path, node: Node) -> Self {
        Self { path, node }
    }

    /// Location of the data.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last path segment, `None` at the root.
    pub fn name(&self) -> Option<&str> {
        self.path.name()
    }

    /// The data as a tree.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Consumes the snapshot, returning the tree.
    pub fn into_node(self) -> Node {
        self.node
    }

    /// Plain JSON, without priorities. Absent data is `null`.
    pub fn value(&self) -> Value {
        node_to_json(&self.node)
    }

    /// JSON including `.priority` and `.value` keys.
    pub fn export(&self) -> Value {
        node_export(&self.node)
    }

    /// Priority of the node.
    pub fn priority(&self) -> &Priority {
        self.node.priority()
    }

    /// Returns true if data exists at this location.
    pub fn exists(&self) -> bool {
        !self.node.is_empty()
    }

    /// Snapshot of a descendant, addressed by a relative slash path.
    pub fn child(&self, path: &str) -> SyncResult<DataSnapshot> {
        let relative = Path::parse(path)?;
        Ok(DataSnapshot {
            path: self.path.join(&relative),
            node: self.node.get(&relative).clone(),
        })
    }

    /// Returns true if a descendant exists at the relative path.
    pub fn has_child(&self, path: &str) -> bool {
        Path::parse(path).is_ok_and(|p| !self.node.get(&p).is_empty())
    }

    /// Number of direct children.
    pub fn children_count(&self) -> usize {
        self.node.child_count()
    }

    /// Direct children in priority order.
    pub fn children(&self) -> Vec<DataSnapshot> {
        self.node
            .ordered_children()
            .into_iter()
            .map(|(name, child)| DataSnapshot::new(self.path.child_key(name), child.clone()))
            .collect()
    }
}

/// The value a transaction transform reads and replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct MutableData {
    path: Path,
    node: Node,
}

impl MutableData {
    pub(crate) fn new(path: Path, node: Node) -> Self {
        Self { path, node }
    }

    /// Location of the data.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current data as a tree.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Current data as plain JSON.
    pub fn value(&self) -> Value {
        node_to_json(&self.node)
    }

    /// Current priority.
    pub fn priority(&self) -> &Priority {
        self.node.priority()
    }

    /// Number of direct children.
    pub fn children_count(&self) -> usize {
        self.node.child_count()
    }

    /// Copy of a descendant, addressed by a relative slash path.
    pub fn child(&self, path: &str) -> SyncResult<MutableData> {
        let relative = Path::parse(path)?;
        Ok(MutableData {
            path: self.path.join(&relative),
            node: self.node.get(&relative).clone(),
        })
    }

    /// Replaces the value, keeping the current priority.
    pub fn set_value(&mut self, value: &Value) -> SyncResult<()> {
        let priority = self.node.priority().clone();
        self.node = node_from_json(value)?.with_priority(priority);
        Ok(())
    }

    /// Replaces the value at a relative path.
    pub fn set_child_value(&mut self, path: &str, value: &Value) -> SyncResult<()> {
        let relative = Path::parse(path)?;
        let node = std::mem::take(&mut self.node);
        self.node = node.with_path(&relative, node_from_json(value)?);
        Ok(())
    }

    /// Replaces the whole tree, rejecting nodes the importer would refuse.
    pub fn set_node(&mut self, node: Node) -> SyncResult<()> {
        node.validate(DEFAULT_MAX_DEPTH)?;
        self.node = node;
        Ok(())
    }

    /// Changes the priority. Has no effect on absent data.
    pub fn set_priority(&mut self, priority: impl Into<Priority>) -> SyncResult<()> {
        let priority = priority.into();
        priority.validate()?;
        let node = std::mem::take(&mut self.node);
        self.node = node.with_priority(priority);
        Ok(())
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }
}

/// What a transaction transform decided.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionResult {
    /// Write this data.
    Success(MutableData),
    /// Stop without writing.
    Abort,
}

/// Final outcome of a transaction that was not aborted by an error.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    /// True if the transform's result was accepted by the authority.
    pub committed: bool,
    /// Data at the location once the transaction finished.
    pub snapshot: DataSnapshot,
}
