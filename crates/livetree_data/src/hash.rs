//! Content hashes of nodes.
//!
//! Conditional writes are guarded by the hash of the value the writer last
//! saw; two nodes hash equal exactly when their exports are equal.

use crate::json::node_export;
use crate::node::Node;
use sha2::{Digest, Sha256};

/// SHA-256 of a node's canonical export, priorities included.
pub fn node_hash(node: &Node) -> [u8; 32] {
    // serde_json objects are sorted maps, so the rendering is canonical.
    let rendered = node_export(node).to_string();
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::node_from_json;
    use crate::priority::Priority;
    use serde_json::json;

    #[test]
    fn equal_nodes_hash_equal() {
        let a = node_from_json(&json!({"x": 1, "y": [1, 2]})).unwrap();
        let b = node_from_json(&json!({"y": {"0": 1, "1": 2}, "x": 1})).unwrap();
        assert_eq!(node_hash(&a), node_hash(&b));
    }

    #[test]
    fn priority_changes_hash() {
        let a = Node::from(1);
        let b = Node::from(1).with_priority(Priority::Number(2.0));
        assert_ne!(node_hash(&a), node_hash(&b));
        assert_ne!(node_hash(&Node::Empty), node_hash(&a));
    }
}
