//! # livetree data model
//!
//! The value types shared by every livetree crate.
//!
//! This crate provides:
//! - [`Path`] for addressing nodes
//! - [`Priority`] and the sibling ordering built on it
//! - [`Node`], the closed tagged payload stored in the tree
//! - [`QueryParams`] for range and limit constrained views
//! - JSON import (the validation boundary) and export
//! - Content hashing for conditional writes
//!
//! This is a pure data crate with no I/O.
//!
//! ## Usage
//!
//! ```
//! use livetree_data::{node_from_json, node_to_json, Path};
//! use serde_json::json;
//!
//! let node = node_from_json(&json!({"users": {"fred": {"age": 30}}})).unwrap();
//! let age = node.get(&Path::parse("users/fred/age").unwrap());
//! assert_eq!(node_to_json(age), json!(30));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hash;
mod json;
mod node;
mod path;
mod priority;
mod query;

pub use error::{DataError, DataResult};
pub use hash::node_hash;
pub use json::{
    node_export, node_from_json, node_from_json_with_depth, node_to_json, priority_from_json,
    priority_to_json, DEFAULT_MAX_DEPTH,
};
pub use node::{Node, Primitive};
pub use path::{validate_key, Path, MAX_KEY_BYTES};
pub use priority::{compare_siblings, Priority, SiblingKey};
pub use query::{Bound, QueryParams};
