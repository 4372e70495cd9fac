//! Priorities and the sibling ordering built on them.
//!
//! Children of one parent are totally ordered:
//!
//! 1. children without a priority, by name;
//! 2. children with a numeric priority, by priority ascending then name;
//! 3. children with a string priority, by priority lexicographically then name.
//!
//! Numeric priorities compare as IEEE-754 doubles. NaN never reaches this
//! module because [`Priority::number`] and the JSON importer reject it.

use crate::error::{DataError, DataResult};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Ordering key attached to a node, distinct from its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Priority {
    /// No priority.
    #[default]
    None,
    /// Numeric priority.
    Number(f64),
    /// String priority.
    String(String),
}

impl Priority {
    /// Creates a numeric priority, rejecting NaN and infinities.
    pub fn number(value: f64) -> DataResult<Self> {
        if !value.is_finite() {
            return Err(DataError::InvalidNumber(value));
        }
        Ok(Priority::Number(value))
    }

    /// Creates a string priority.
    pub fn string(value: impl Into<String>) -> Self {
        Priority::String(value.into())
    }

    /// Returns true when no priority is set.
    pub fn is_none(&self) -> bool {
        matches!(self, Priority::None)
    }

    /// Checks that a numeric priority is finite.
    pub fn validate(&self) -> DataResult<()> {
        match self {
            Priority::Number(n) if !n.is_finite() => Err(DataError::InvalidNumber(*n)),
            _ => Ok(()),
        }
    }

    fn bucket(&self) -> u8 {
        match self {
            Priority::None => 0,
            Priority::Number(_) => 1,
            Priority::String(_) => 2,
        }
    }
}

impl Eq for Priority {}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Priority::Number(a), Priority::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Priority::String(a), Priority::String(b)) => a.cmp(b),
            _ => self.bucket().cmp(&other.bucket()),
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Priority {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Priority::None => 0u8.hash(state),
            Priority::Number(n) => {
                1u8.hash(state);
                // 0.0 and -0.0 compare equal
                let n = if *n == 0.0 { 0.0f64 } else { *n };
                n.to_bits().hash(state);
            }
            Priority::String(s) => {
                2u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl From<f64> for Priority {
    fn from(value: f64) -> Self {
        Priority::Number(value)
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Priority::Number(value as f64)
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority::Number(f64::from(value))
    }
}

impl From<&str> for Priority {
    fn from(value: &str) -> Self {
        Priority::String(value.to_string())
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        Priority::String(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::None => f.write_str("null"),
            Priority::Number(n) => write!(f, "{n}"),
            Priority::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Compares two siblings by priority, then name.
pub fn compare_siblings(
    a_name: &str,
    a_priority: &Priority,
    b_name: &str,
    b_priority: &Priority,
) -> Ordering {
    a_priority.cmp(b_priority).then_with(|| a_name.cmp(b_name))
}

/// Position of a child among its siblings: the pair its ordering is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingKey {
    /// Child priority.
    pub priority: Priority,
    /// Child name.
    pub name: String,
}

impl SiblingKey {
    /// Creates a sibling key.
    pub fn new(priority: Priority, name: impl Into<String>) -> Self {
        Self {
            priority,
            name: name.into(),
        }
    }
}

impl Ord for SiblingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_siblings(&self.name, &self.priority, &other.name, &other.priority)
    }
}

impl PartialOrd for SiblingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(priority: Priority, name: &str) -> SiblingKey {
        SiblingKey::new(priority, name)
    }

    #[test]
    fn buckets_are_ordered() {
        let mut keys = vec![
            key(Priority::string("b"), "x"),
            key(Priority::Number(2.0), "y"),
            key(Priority::None, "z"),
            key(Priority::Number(-1.5), "w"),
            key(Priority::None, "a"),
            key(Priority::string("a"), "q"),
        ];
        keys.sort();
        let names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["a", "z", "w", "y", "q", "x"]);
    }

    #[test]
    fn ties_break_by_name() {
        let a = key(Priority::Number(1.0), "a");
        let b = key(Priority::Number(1.0), "b");
        assert!(a < b);

        let a = key(Priority::string("p"), "b");
        let b = key(Priority::string("p"), "c");
        assert!(a < b);
    }

    #[test]
    fn numbers_compare_as_doubles() {
        assert!(Priority::Number(9.0) < Priority::Number(10.0));
        assert!(Priority::Number(-0.5) < Priority::Number(0.25));
        assert!(Priority::string("10") < Priority::string("9"));
    }

    #[test]
    fn non_finite_rejected() {
        assert!(Priority::number(f64::NAN).is_err());
        assert!(Priority::number(f64::INFINITY).is_err());
        assert!(Priority::number(3.5).is_ok());
        assert!(Priority::Number(f64::NAN).validate().is_err());
    }

    fn priority_strategy() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::None),
            (-1.0e6f64..1.0e6).prop_map(Priority::Number),
            "[a-z]{0,4}".prop_map(Priority::String),
        ]
    }

    proptest! {
        #[test]
        fn ordering_is_total_and_consistent(
            a in priority_strategy(), an in "[a-z]{1,3}",
            b in priority_strategy(), bn in "[a-z]{1,3}",
            c in priority_strategy(), cn in "[a-z]{1,3}",
        ) {
            let a = SiblingKey::new(a, an);
            let b = SiblingKey::new(b, bn);
            let c = SiblingKey::new(c, cn);

            // antisymmetry
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            // transitivity
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
            // bucket precedence
            if a.priority.bucket() < b.priority.bucket() {
                prop_assert!(a < b);
            }
        }
    }
}
